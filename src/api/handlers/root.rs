use axum::response::IntoResponse;

// Undocumented liveness/landing route.
pub async fn root() -> impl IntoResponse {
    crate::APP_USER_AGENT
}

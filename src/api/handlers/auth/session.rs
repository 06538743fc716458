//! Logout: refresh-token revocation.

use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};
use sqlx::PgPool;
use tracing::error;

use super::tokens::{RevokeOutcome, revoke_refresh};
use super::types::LogoutRequest;

/// Revoke a refresh token.
///
/// Once revoked, the token can never mint another access token. Missing,
/// malformed, unknown, and already-revoked tokens all get the same 400; the
/// endpoint never confirms whether a token was valid.
#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    request_body = LogoutRequest,
    responses(
        (status = 204, description = "Token revoked"),
        (status = 400, description = "Invalid or missing token", body = String)
    ),
    tag = "auth"
)]
pub async fn logout(
    pool: Extension<PgPool>,
    payload: Option<Json<LogoutRequest>>,
) -> impl IntoResponse {
    let request: LogoutRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Invalid token".to_string()).into_response(),
    };

    let refresh = request.refresh.trim();
    if refresh.is_empty() {
        return (StatusCode::BAD_REQUEST, "Invalid token".to_string()).into_response();
    }

    match revoke_refresh(&pool, refresh).await {
        Ok(RevokeOutcome::Revoked) => StatusCode::NO_CONTENT.into_response(),
        Ok(RevokeOutcome::Invalid) => {
            (StatusCode::BAD_REQUEST, "Invalid token".to_string()).into_response()
        }
        Err(err) => {
            error!("Failed to revoke refresh token: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Logout failed".to_string(),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{LogoutRequest, logout};
    use anyhow::Result;
    use axum::Json;
    use axum::extract::Extension;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use sqlx::postgres::PgPoolOptions;

    #[tokio::test]
    async fn logout_missing_payload() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = logout(Extension(pool), None).await.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn logout_blank_token() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = logout(
            Extension(pool),
            Some(Json(LogoutRequest {
                refresh: "  ".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }
}

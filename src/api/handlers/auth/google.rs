//! Google sign-in endpoint.

use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use crate::api::handlers::GoogleVerifier;

use super::state::AuthState;
use super::storage::find_or_create_federated;
use super::tokens::issue_pair;
use super::types::{GoogleLoginRequest, LoginResponse, PublicUser};
use super::utils::normalize_email;

/// Authenticate with a Google ID token.
///
/// The token's signature, issuer, audience, and expiry are checked against
/// Google's published keys; any verification problem is one generic 401 and
/// no account is created. First-sight emails get an account that is active
/// immediately, since the provider already verified the address.
#[utoipa::path(
    post,
    path = "/v1/auth/google",
    request_body = GoogleLoginRequest,
    responses(
        (status = 200, description = "Login successful", body = LoginResponse),
        (status = 400, description = "Missing token", body = String),
        (status = 401, description = "Invalid identity token", body = String)
    ),
    tag = "auth"
)]
pub async fn google_login(
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    verifier: Extension<Arc<GoogleVerifier>>,
    payload: Option<Json<GoogleLoginRequest>>,
) -> impl IntoResponse {
    let request: GoogleLoginRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let id_token = request.id_token.trim();
    if id_token.is_empty() {
        return (StatusCode::BAD_REQUEST, "Missing token".to_string()).into_response();
    }

    let Some(claims) = verifier.verify(id_token).await else {
        return (
            StatusCode::UNAUTHORIZED,
            "Invalid identity token".to_string(),
        )
            .into_response();
    };

    let Some(email) = claims.email.as_deref() else {
        // No email claim means nothing to bind the account to.
        error!(sub = %claims.sub, "identity token verified but carries no email claim");
        return (
            StatusCode::UNAUTHORIZED,
            "Invalid identity token".to_string(),
        )
            .into_response();
    };
    let email = normalize_email(email);

    let account = match find_or_create_federated(&pool, &email, &claims.sub).await {
        Ok(account) => account,
        Err(err) => {
            error!("Failed to resolve federated account: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Login failed".to_string(),
            )
                .into_response();
        }
    };

    let pair = match issue_pair(&pool, account.id, auth_state.config()).await {
        Ok(pair) => pair,
        Err(err) => {
            error!("Failed to issue token pair: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Login failed".to_string(),
            )
                .into_response();
        }
    };

    let response = LoginResponse {
        refresh: pair.refresh,
        access: pair.access,
        user: PublicUser {
            username: account.username,
            email: account.email,
        },
    };
    (StatusCode::OK, Json(response)).into_response()
}

#[cfg(test)]
mod tests {
    use super::super::rate_limit::{NoopRateLimiter, RateLimiter};
    use super::super::state::{AuthConfig, AuthState};
    use super::{GoogleLoginRequest, google_login};
    use crate::api::handlers::{GoogleKeySet, GoogleVerifier};
    use anyhow::Result;
    use axum::Json;
    use axum::extract::Extension;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use sqlx::postgres::PgPoolOptions;
    use std::sync::Arc;

    fn auth_state() -> Arc<AuthState> {
        let limiter: Arc<dyn RateLimiter> = Arc::new(NoopRateLimiter);
        Arc::new(AuthState::new(AuthConfig::new(), limiter))
    }

    fn verifier() -> Arc<GoogleVerifier> {
        Arc::new(GoogleVerifier::new(
            GoogleKeySet::default(),
            "client-id.apps.googleusercontent.com".to_string(),
        ))
    }

    #[tokio::test]
    async fn google_login_missing_payload() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = google_login(
            Extension(pool),
            Extension(auth_state()),
            Extension(verifier()),
            None,
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn google_login_blank_token() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = google_login(
            Extension(pool),
            Extension(auth_state()),
            Extension(verifier()),
            Some(Json(GoogleLoginRequest {
                id_token: " ".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn google_login_garbage_token_is_unauthorized() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = google_login(
            Extension(pool),
            Extension(auth_state()),
            Extension(verifier()),
            Some(Json(GoogleLoginRequest {
                id_token: "not-a-jwt".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }
}

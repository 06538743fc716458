//! Credential login endpoint.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use super::password::{verify_dummy, verify_password};
use super::rate_limit::{RateLimitAction, RateLimitDecision};
use super::state::AuthState;
use super::storage::lookup_by_identifier;
use super::tokens::issue_pair;
use super::types::{LoginRequest, LoginResponse, PublicUser};
use super::utils::extract_client_ip;

const INVALID_CREDENTIALS: &str = "Invalid username/email or password";

/// Authenticate with a username-or-email identifier and password.
///
/// Unknown identifiers and wrong passwords are indistinguishable in the
/// response; a dummy hash verification keeps the work similar too. An
/// unverified account with a correct password gets the distinct 403 so the
/// caller can prompt for the code instead of a password retry.
#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = LoginResponse),
        (status = 400, description = "Missing fields", body = String),
        (status = 401, description = "Invalid credentials", body = String),
        (status = 403, description = "Account not verified", body = String),
        (status = 429, description = "Rate limited", body = String)
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<LoginRequest>>,
) -> impl IntoResponse {
    let request: LoginRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let identifier = request.identifier.trim();
    if identifier.is_empty() || request.password.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            "Please provide both identifier and password".to_string(),
        )
            .into_response();
    }

    let client_ip = extract_client_ip(&headers);
    if auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::Login)
        == RateLimitDecision::Limited
    {
        return (StatusCode::TOO_MANY_REQUESTS, "Rate limited".to_string()).into_response();
    }

    let account = match lookup_by_identifier(&pool, identifier).await {
        Ok(account) => account,
        Err(err) => {
            error!("Login lookup failed: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Login failed".to_string(),
            )
                .into_response();
        }
    };

    let Some(account) = account else {
        verify_dummy(&request.password);
        return (StatusCode::UNAUTHORIZED, INVALID_CREDENTIALS.to_string()).into_response();
    };

    let password_matches = match &account.password_hash {
        Some(password_hash) => verify_password(&request.password, password_hash),
        None => {
            // Federated-only account; a password can never match.
            verify_dummy(&request.password);
            false
        }
    };
    if !password_matches {
        return (StatusCode::UNAUTHORIZED, INVALID_CREDENTIALS.to_string()).into_response();
    }

    if !account.is_active {
        return (
            StatusCode::FORBIDDEN,
            "Account not verified. Please verify your email".to_string(),
        )
            .into_response();
    }

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
    use super::{LoginRequest, login};
    use anyhow::Result;
    use axum::Json;
    use axum::extract::Extension;
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::IntoResponse;
    use sqlx::postgres::PgPoolOptions;
    use std::sync::Arc;

    fn auth_state() -> Arc<AuthState> {
        let limiter: Arc<dyn RateLimiter> = Arc::new(NoopRateLimiter);
        Arc::new(AuthState::new(AuthConfig::new(), limiter))
    }

    #[tokio::test]
    async fn login_missing_payload() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = login(HeaderMap::new(), Extension(pool), Extension(auth_state()), None)
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn login_missing_fields() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = login(
            HeaderMap::new(),
            Extension(pool),
            Extension(auth_state()),
            Some(Json(LoginRequest {
                identifier: "alice".to_string(),
                password: String::new(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }
}

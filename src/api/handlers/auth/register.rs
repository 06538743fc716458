//! Registration endpoint.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use crate::api::email::TEMPLATE_VERIFY_EMAIL;

use super::password::hash_password;
use super::rate_limit::{RateLimitAction, RateLimitDecision};
use super::state::AuthState;
use super::storage::{
    InsertOutcome, NewAccount, email_exists, enqueue_passcode_email, insert_account,
    replace_passcode, username_exists,
};
use super::types::{DetailResponse, RegisterRequest};
use super::utils::{
    extract_client_ip, normalize_email, valid_email, valid_password, valid_username,
};

/// Create an inactive account and send a verification code.
///
/// Uniqueness is checked before any write and backstopped by the unique
/// constraints; the account row, its passcode, and the outbox row commit
/// together or not at all. The code never appears in the response body.
#[utoipa::path(
    post,
    path = "/v1/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created, verification code sent", body = DetailResponse),
        (status = 400, description = "Validation error", body = String),
        (status = 409, description = "Username or email already registered", body = String),
        (status = 429, description = "Rate limited", body = String)
    ),
    tag = "auth"
)]
pub async fn register(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<RegisterRequest>>,
) -> impl IntoResponse {
    let request: RegisterRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let username = request.username.trim().to_string();
    let email = normalize_email(&request.email);

    if !valid_username(&username) {
        return (StatusCode::BAD_REQUEST, "Invalid username".to_string()).into_response();
    }
    if !valid_email(&email) {
        return (StatusCode::BAD_REQUEST, "Invalid email".to_string()).into_response();
    }
    if !valid_password(&request.password) {
        return (StatusCode::BAD_REQUEST, "Invalid password".to_string()).into_response();
    }

    let client_ip = extract_client_ip(&headers);
    if auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::Register)
        == RateLimitDecision::Limited
    {
        return (StatusCode::TOO_MANY_REQUESTS, "Rate limited".to_string()).into_response();
    }

    let password_hash = match hash_password(&request.password) {
        Ok(password_hash) => password_hash,
        Err(err) => {
            error!("Failed to hash password during registration: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Registration failed".to_string(),
            )
                .into_response();
        }
    };

    let mut tx = match pool.begin().await {
        Ok(tx) => tx,
        Err(err) => {
            error!("Failed to start registration transaction: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Registration failed".to_string(),
            )
                .into_response();
        }
    };

    // Duplicates get a field-specific conflict, never a silent overwrite.
    match username_exists(&mut tx, &username).await {
        Ok(false) => {}
        Ok(true) => {
            let _ = tx.rollback().await;
            return (StatusCode::CONFLICT, "Username already taken".to_string()).into_response();
        }
        Err(err) => {
            error!("Failed to check username: {err}");
            let _ = tx.rollback().await;
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Registration failed".to_string(),
            )
                .into_response();
        }
    }
    match email_exists(&mut tx, &email).await {
        Ok(false) => {}
        Ok(true) => {
            let _ = tx.rollback().await;
            return (
                StatusCode::CONFLICT,
                "Email already registered".to_string(),
            )
                .into_response();
        }
        Err(err) => {
            error!("Failed to check email: {err}");
            let _ = tx.rollback().await;
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Registration failed".to_string(),
            )
                .into_response();
        }
    }

    let account = NewAccount {
        username: &username,
        email: &email,
        password_hash: &password_hash,
        first_name: request.first_name.as_deref(),
        last_name: request.last_name.as_deref(),
    };
    let user_id = match insert_account(&mut tx, &account).await {
        Ok(InsertOutcome::Created(user_id)) => user_id,
        Ok(InsertOutcome::DuplicateUsername) => {
            let _ = tx.rollback().await;
            return (StatusCode::CONFLICT, "Username already taken".to_string()).into_response();
        }
        Ok(InsertOutcome::DuplicateEmail) => {
            let _ = tx.rollback().await;
            return (
                StatusCode::CONFLICT,
                "Email already registered".to_string(),
            )
                .into_response();
        }
        Err(err) => {
            error!("Failed to insert account: {err}");
            let _ = tx.rollback().await;
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Registration failed".to_string(),
            )
                .into_response();
        }
    };

    let code = match replace_passcode(&mut tx, user_id, auth_state.config()).await {
        Ok(code) => code,
        Err(err) => {
            error!("Failed to issue passcode: {err}");
            let _ = tx.rollback().await;
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Registration failed".to_string(),
            )
                .into_response();
        }
    };

    if let Err(err) =
        enqueue_passcode_email(&mut tx, &email, &username, TEMPLATE_VERIFY_EMAIL, &code).await
    {
        // The account must not exist in a state where the user never got a code.
        error!("Failed to enqueue verification email: {err}");
        let _ = tx.rollback().await;
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Registration failed".to_string(),
        )
            .into_response();
    }

    if let Err(err) = tx.commit().await {
        error!("Failed to commit registration: {err}");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Registration failed".to_string(),
        )
            .into_response();
    }

    (
        StatusCode::CREATED,
        Json(DetailResponse::new(
            "Registered. Check your email for the verification code.",
        )),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::super::rate_limit::{NoopRateLimiter, RateLimiter};
    use super::super::state::{AuthConfig, AuthState};
    use super::{RegisterRequest, register};
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

    fn request(username: &str, email: &str, password: &str) -> RegisterRequest {
        RegisterRequest {
            username: username.to_string(),
            email: email.to_string(),
            password: password.to_string(),
            first_name: None,
            last_name: None,
        }
    }

    #[tokio::test]
    async fn register_missing_payload() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = register(HeaderMap::new(), Extension(pool), Extension(auth_state()), None)
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn register_invalid_username() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = register(
            HeaderMap::new(),
            Extension(pool),
            Extension(auth_state()),
            Some(Json(request("a!", "alice@example.com", "longenough"))),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn register_invalid_email() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = register(
            HeaderMap::new(),
            Extension(pool),
            Extension(auth_state()),
            Some(Json(request("alice", "not-an-email", "longenough"))),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn register_short_password() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = register(
            HeaderMap::new(),
            Extension(pool),
            Extension(auth_state()),
            Some(Json(request("alice", "alice@example.com", "short"))),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }
}

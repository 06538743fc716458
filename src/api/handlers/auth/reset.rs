//! Password reset endpoints: request a code, then confirm with it.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use chrono::Utc;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use crate::api::email::TEMPLATE_PASSWORD_RESET;

use super::otp::{PasscodeCheck, check_passcode};
use super::password::hash_password;
use super::rate_limit::{RateLimitAction, RateLimitDecision};
use super::state::AuthState;
use super::storage::{
    delete_passcode, enqueue_passcode_email, fetch_passcode_for_update, lookup_by_identifier,
    replace_passcode, update_password,
};
use super::types::{DetailResponse, PasswordResetConfirmRequest, PasswordResetRequest};
use super::utils::{extract_client_ip, valid_password};

/// Issue a password-reset code to the account's registered email.
///
/// Replace-then-issue like registration: any previous passcode dies here.
/// Unknown identifiers are reported as 404; this endpoint accepts the
/// account-enumeration tradeoff.
#[utoipa::path(
    post,
    path = "/v1/auth/password-reset/request",
    request_body = PasswordResetRequest,
    responses(
        (status = 200, description = "Reset code sent", body = DetailResponse),
        (status = 400, description = "Missing identifier", body = String),
        (status = 404, description = "Unknown account", body = String),
        (status = 429, description = "Rate limited", body = String)
    ),
    tag = "auth"
)]
pub async fn request_reset(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<PasswordResetRequest>>,
) -> impl IntoResponse {
    let request: PasswordResetRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let identifier = request.identifier.trim();
    if identifier.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            "Username or email is required".to_string(),
        )
            .into_response();
    }

    let client_ip = extract_client_ip(&headers);
    if auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::ResetRequest)
        == RateLimitDecision::Limited
    {
        return (StatusCode::TOO_MANY_REQUESTS, "Rate limited".to_string()).into_response();
    }

    let account = match lookup_by_identifier(&pool, identifier).await {
        Ok(Some(account)) => account,
        Ok(None) => {
            return (StatusCode::NOT_FOUND, "User not found".to_string()).into_response();
        }
        Err(err) => {
            error!("Reset-request lookup failed: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Reset request failed".to_string(),
            )
                .into_response();
        }
    };

    let mut tx = match pool.begin().await {
        Ok(tx) => tx,
        Err(err) => {
            error!("Failed to start reset-request transaction: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Reset request failed".to_string(),
            )
                .into_response();
        }
    };

    let outcome = async {
        let code = replace_passcode(&mut tx, account.id, auth_state.config()).await?;
        enqueue_passcode_email(
            &mut tx,
            &account.email,
            &account.username,
            TEMPLATE_PASSWORD_RESET,
            &code,
        )
        .await
    }
    .await;

    if let Err(err) = outcome {
        error!("Failed to issue reset passcode: {err}");
        let _ = tx.rollback().await;
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Reset request failed".to_string(),
        )
            .into_response();
    }

    if let Err(err) = tx.commit().await {
        error!("Failed to commit reset request: {err}");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Reset request failed".to_string(),
        )
            .into_response();
    }

    (
        StatusCode::OK,
        Json(DetailResponse::new("Code sent to the registered email.")),
    )
        .into_response()
}

/// Set a new password after verifying the reset code.
///
/// The same identifier rule as login resolves the account. The passcode is
/// consumed in the transaction that stores the new hash; expired and
/// mismatched codes are reported distinctly and leave the code in place.
/// Activation state never changes here.
#[utoipa::path(
    post,
    path = "/v1/auth/password-reset/confirm",
    request_body = PasswordResetConfirmRequest,
    responses(
        (status = 200, description = "Password reset", body = DetailResponse),
        (status = 400, description = "Missing fields or invalid/expired code", body = String)
    ),
    tag = "auth"
)]
pub async fn confirm_reset(
    pool: Extension<PgPool>,
    payload: Option<Json<PasswordResetConfirmRequest>>,
) -> impl IntoResponse {
    let request: PasswordResetConfirmRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let identifier = request.identifier.trim();
    let code = request.code.trim();
    if identifier.is_empty() || code.is_empty() || request.new_password.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            "All fields are required".to_string(),
        )
            .into_response();
    }
    if !valid_password(&request.new_password) {
        return (StatusCode::BAD_REQUEST, "Invalid password".to_string()).into_response();
    }

    let account = match lookup_by_identifier(&pool, identifier).await {
        Ok(Some(account)) => account,
        Ok(None) => {
            return (
                StatusCode::BAD_REQUEST,
                "Invalid username/email or code".to_string(),
            )
                .into_response();
        }
        Err(err) => {
            error!("Reset-confirm lookup failed: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Password reset failed".to_string(),
            )
                .into_response();
        }
    };

    let mut tx = match pool.begin().await {
        Ok(tx) => tx,
        Err(err) => {
            error!("Failed to start reset-confirm transaction: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Password reset failed".to_string(),
            )
                .into_response();
        }
    };

    let record = match fetch_passcode_for_update(&mut tx, account.id).await {
        Ok(record) => record,
        Err(err) => {
            error!("Failed to fetch reset passcode: {err}");
            let _ = tx.rollback().await;
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Password reset failed".to_string(),
            )
                .into_response();
        }
    };

    match check_passcode(record.as_ref(), code, Utc::now()) {
        PasscodeCheck::NotFound => {
            let _ = tx.rollback().await;
            (
                StatusCode::BAD_REQUEST,
                "Invalid username/email or code".to_string(),
            )
                .into_response()
        }
        PasscodeCheck::Expired => {
            let _ = tx.rollback().await;
            (
                StatusCode::BAD_REQUEST,
                "Code expired. Request a new one".to_string(),
            )
                .into_response()
        }
        PasscodeCheck::Mismatch => {
            let _ = tx.rollback().await;
            (StatusCode::BAD_REQUEST, "Invalid code".to_string()).into_response()
        }
        PasscodeCheck::Ok => {
            let password_hash = match hash_password(&request.new_password) {
                Ok(password_hash) => password_hash,
                Err(err) => {
                    error!("Failed to hash new password: {err}");
                    let _ = tx.rollback().await;
                    return (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Password reset failed".to_string(),
                    )
                        .into_response();
                }
            };

            let outcome = async {
                delete_passcode(&mut tx, account.id).await?;
                update_password(&mut tx, account.id, &password_hash).await
            }
            .await;
            if let Err(err) = outcome {
                error!("Failed to store new password: {err}");
                let _ = tx.rollback().await;
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Password reset failed".to_string(),
                )
                    .into_response();
            }

            if let Err(err) = tx.commit().await {
                error!("Failed to commit password reset: {err}");
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Password reset failed".to_string(),
                )
                    .into_response();
            }

            (
                StatusCode::OK,
                Json(DetailResponse::new(
                    "Password reset successful. You can now log in.",
                )),
            )
                .into_response()
        }
    }
}

//! Registration verification endpoint.

use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};
use chrono::Utc;
use sqlx::PgPool;
use tracing::error;

use super::otp::{PasscodeCheck, check_passcode};
use super::storage::{
    activate_account, delete_passcode, fetch_passcode_for_update, lookup_by_username,
};
use super::types::{DetailResponse, VerifyOtpRequest};

/// Activate an account by verifying the emailed passcode.
///
/// Resolution is by username only. Unknown usernames and missing passcodes
/// share one generic error so the endpoint cannot be used to enumerate
/// accounts. A correct-but-expired code reports expired and is kept; only a
/// successful verification consumes the code and flips the account active.
#[utoipa::path(
    post,
    path = "/v1/auth/verify-otp",
    request_body = VerifyOtpRequest,
    responses(
        (status = 200, description = "Account activated", body = DetailResponse),
        (status = 400, description = "Invalid, expired, or unknown code", body = String)
    ),
    tag = "auth"
)]
pub async fn verify_otp(
    pool: Extension<PgPool>,
    payload: Option<Json<VerifyOtpRequest>>,
) -> impl IntoResponse {
    let request: VerifyOtpRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let username = request.username.trim();
    let code = request.code.trim();
    if username.is_empty() || code.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            "Missing username or code".to_string(),
        )
            .into_response();
    }

    let account = match lookup_by_username(&pool, username).await {
        Ok(Some(account)) => account,
        Ok(None) => {
            return (
                StatusCode::BAD_REQUEST,
                "Invalid username or code".to_string(),
            )
                .into_response();
        }
        Err(err) => {
            error!("Failed to resolve account for verification: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Verification failed".to_string(),
            )
                .into_response();
        }
    };

    let mut tx = match pool.begin().await {
        Ok(tx) => tx,
        Err(err) => {
            error!("Failed to start verification transaction: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Verification failed".to_string(),
            )
                .into_response();
        }
    };

    // The row lock makes the passcode single-use under concurrent submits.
    let record = match fetch_passcode_for_update(&mut tx, account.id).await {
        Ok(record) => record,
        Err(err) => {
            error!("Failed to fetch passcode: {err}");
            let _ = tx.rollback().await;
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Verification failed".to_string(),
            )
                .into_response();
        }
    };

    match check_passcode(record.as_ref(), code, Utc::now()) {
        PasscodeCheck::NotFound => {
            let _ = tx.rollback().await;
            (
                StatusCode::BAD_REQUEST,
                "Invalid username or code".to_string(),
            )
                .into_response()
        }
        PasscodeCheck::Expired => {
            // Kept in place; the user must request a fresh code.
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
            if let Err(err) = delete_passcode(&mut tx, account.id).await {
                error!("Failed to consume passcode: {err}");
                let _ = tx.rollback().await;
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Verification failed".to_string(),
                )
                    .into_response();
            }
            if let Err(err) = activate_account(&mut tx, account.id).await {
                error!("Failed to activate account: {err}");
                let _ = tx.rollback().await;
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Verification failed".to_string(),
                )
                    .into_response();
            }
            if let Err(err) = tx.commit().await {
                error!("Failed to commit verification: {err}");
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Verification failed".to_string(),
                )
                    .into_response();
            }
            (
                StatusCode::OK,
                Json(DetailResponse::new("Email verified. You can now log in.")),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{VerifyOtpRequest, verify_otp};
    use anyhow::Result;
    use axum::Json;
    use axum::extract::Extension;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use sqlx::postgres::PgPoolOptions;

    #[tokio::test]
    async fn verify_otp_missing_payload() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = verify_otp(Extension(pool), None).await.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn verify_otp_blank_fields() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = verify_otp(
            Extension(pool),
            Some(Json(VerifyOtpRequest {
                username: "alice".to_string(),
                code: "  ".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }
}

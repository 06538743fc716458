//! User lookup endpoints.

use axum::{
    Json,
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::error;
use utoipa::ToSchema;

use super::auth::storage::email_by_username;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct EmailLookupRequest {
    pub username: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct EmailLookupResponse {
    pub email: String,
}

/// Resolve a username to its registered email address.
///
/// Used by the password-reset flow so users who only remember their username
/// can see where the code will go. Reports unknown usernames as 404; account
/// existence is intentionally observable here.
#[utoipa::path(
    post,
    path = "/v1/users/email-lookup",
    request_body = EmailLookupRequest,
    responses(
        (status = 200, description = "Email found", body = EmailLookupResponse),
        (status = 400, description = "Missing username", body = String),
        (status = 404, description = "Unknown username", body = String)
    ),
    tag = "auth"
)]
pub async fn email_lookup(
    pool: Extension<PgPool>,
    payload: Option<Json<EmailLookupRequest>>,
) -> impl IntoResponse {
    let request: EmailLookupRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let username = request.username.trim();
    if username.is_empty() {
        return (StatusCode::BAD_REQUEST, "Missing username".to_string()).into_response();
    }

    match email_by_username(&pool, username).await {
        Ok(Some(email)) => (StatusCode::OK, Json(EmailLookupResponse { email })).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "User not found".to_string()).into_response(),
        Err(err) => {
            error!("Failed to lookup email for username: {err}");
            (StatusCode::INTERNAL_SERVER_ERROR, "Lookup failed".to_string()).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use sqlx::postgres::PgPoolOptions;

    #[tokio::test]
    async fn email_lookup_missing_payload() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = email_lookup(Extension(pool), None).await.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn email_lookup_blank_username() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = email_lookup(
            Extension(pool),
            Some(Json(EmailLookupRequest {
                username: "  ".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[test]
    fn email_lookup_request_round_trips() -> Result<()> {
        let request = EmailLookupRequest {
            username: "alice".to_string(),
        };
        let value = serde_json::to_value(&request)?;
        let decoded: EmailLookupRequest = serde_json::from_value(value)?;
        assert_eq!(decoded.username, "alice");
        Ok(())
    }
}

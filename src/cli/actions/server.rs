use crate::api;
use anyhow::Result;
use std::sync::Arc;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub google_client_id: String,
    pub google_jwks_url: String,
    pub otp_ttl_seconds: i64,
    pub access_token_ttl_seconds: i64,
    pub refresh_token_ttl_seconds: i64,
    pub email_outbox_poll_seconds: u64,
    pub email_outbox_batch_size: usize,
    pub email_outbox_max_attempts: u32,
    pub email_outbox_backoff_base_seconds: u64,
    pub email_outbox_backoff_max_seconds: u64,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the signing key set cannot be fetched or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    // Startup fetch of Google's key set is best-effort; verification fails
    // closed until a refresh succeeds.
    let google_verifier = Arc::new(
        api::handlers::GoogleVerifier::new_remote(args.google_jwks_url, args.google_client_id)
            .await?,
    );

    let auth_config = api::handlers::auth::AuthConfig::new()
        .with_otp_ttl_seconds(args.otp_ttl_seconds)
        .with_access_token_ttl_seconds(args.access_token_ttl_seconds)
        .with_refresh_token_ttl_seconds(args.refresh_token_ttl_seconds);

    let email_config = api::email::EmailWorkerConfig::new()
        .with_poll_interval_seconds(args.email_outbox_poll_seconds)
        .with_batch_size(args.email_outbox_batch_size)
        .with_max_attempts(args.email_outbox_max_attempts)
        .with_backoff_base_seconds(args.email_outbox_backoff_base_seconds)
        .with_backoff_max_seconds(args.email_outbox_backoff_max_seconds);

    api::new(args.port, args.dsn, google_verifier, auth_config, email_config).await
}

//! Opaque session token pairs: issuance and revocation.

use anyhow::{Context, Result, anyhow};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::state::AuthConfig;
use super::utils::{generate_opaque_token, hash_token, is_unique_violation};

/// Raw refresh/access pair. Returned to the caller exactly once; the
/// database only ever sees the hashes.
#[derive(Debug)]
pub(super) struct TokenPair {
    pub(super) refresh: String,
    pub(super) access: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum RevokeOutcome {
    Revoked,
    Invalid,
}

/// Issue a refresh token and an access token derived from it, in one
/// transaction. The access token expires well before the refresh token; its
/// row references the refresh row so revocation cuts off future derivations.
pub(super) async fn issue_pair(
    pool: &PgPool,
    user_id: Uuid,
    config: &AuthConfig,
) -> Result<TokenPair> {
    let mut tx = pool.begin().await.context("begin token transaction")?;

    let refresh_query = r"
        INSERT INTO refresh_tokens (user_id, token_hash, expires_at)
        VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 second'))
        RETURNING id
    ";
    let refresh_span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = refresh_query
    );

    // Retry on the (astronomically unlikely) token hash collision.
    let mut issued: Option<(String, Uuid)> = None;
    for _ in 0..3 {
        let token = generate_opaque_token()?;
        let result = sqlx::query(refresh_query)
            .bind(user_id)
            .bind(hash_token(&token))
            .bind(config.refresh_token_ttl_seconds())
            .fetch_one(&mut *tx)
            .instrument(refresh_span.clone())
            .await;

        match result {
            Ok(row) => {
                issued = Some((token, row.get("id")));
                break;
            }
            Err(err) if is_unique_violation(&err) => {}
            Err(err) => return Err(err).context("failed to insert refresh token"),
        }
    }
    let Some((refresh, refresh_id)) = issued else {
        return Err(anyhow!("failed to generate unique refresh token"));
    };

    let access_query = r"
        INSERT INTO access_tokens (refresh_id, user_id, token_hash, expires_at)
        VALUES ($1, $2, $3, NOW() + ($4 * INTERVAL '1 second'))
    ";
    let access_span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = access_query
    );

    let mut access: Option<String> = None;
    for _ in 0..3 {
        let token = generate_opaque_token()?;
        let result = sqlx::query(access_query)
            .bind(refresh_id)
            .bind(user_id)
            .bind(hash_token(&token))
            .bind(config.access_token_ttl_seconds())
            .execute(&mut *tx)
            .instrument(access_span.clone())
            .await;

        match result {
            Ok(_) => {
                access = Some(token);
                break;
            }
            Err(err) if is_unique_violation(&err) => {}
            Err(err) => return Err(err).context("failed to insert access token"),
        }
    }
    let Some(access) = access else {
        return Err(anyhow!("failed to generate unique access token"));
    };

    tx.commit().await.context("commit token transaction")?;

    Ok(TokenPair { refresh, access })
}

/// Revoke a refresh token permanently.
///
/// Malformed, unknown, expired, and already-revoked tokens all collapse to
/// `Invalid`; revocation never distinguishes why.
pub(super) async fn revoke_refresh(pool: &PgPool, refresh_raw: &str) -> Result<RevokeOutcome> {
    let query = r"
        UPDATE refresh_tokens
        SET revoked_at = NOW()
        WHERE token_hash = $1
          AND revoked_at IS NULL
          AND expires_at > NOW()
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(hash_token(refresh_raw))
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to revoke refresh token")?;

    if result.rows_affected() == 1 {
        Ok(RevokeOutcome::Revoked)
    } else {
        Ok(RevokeOutcome::Invalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revoke_outcome_debug_names() {
        assert_eq!(format!("{:?}", RevokeOutcome::Revoked), "Revoked");
        assert_eq!(format!("{:?}", RevokeOutcome::Invalid), "Invalid");
    }

    #[test]
    fn token_pair_holds_distinct_tokens() {
        let pair = TokenPair {
            refresh: "refresh".to_string(),
            access: "access".to_string(),
        };
        assert_ne!(pair.refresh, pair.access);
    }
}

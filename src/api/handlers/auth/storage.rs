//! Database helpers for accounts, passcodes, and notification enqueuing.

use anyhow::{Context, Result};
use serde_json::json;
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::otp::{PasscodeRecord, generate_passcode};
use super::state::AuthConfig;
use super::utils::{
    IdentifierKind, identifier_kind, is_unique_violation, username_from_email, username_suffix,
    violated_constraint,
};

type PgTx<'t> = sqlx::Transaction<'t, sqlx::Postgres>;

const ACCOUNT_COLUMNS: &str = "id, username, email, password_hash, is_active";

/// Account fields the state machine operates on.
#[derive(Debug, Clone)]
pub(super) struct AccountRecord {
    pub(super) id: Uuid,
    pub(super) username: String,
    pub(super) email: String,
    pub(super) password_hash: Option<String>,
    pub(super) is_active: bool,
}

/// Fields for a password registration; federated accounts go through
/// `find_or_create_federated` instead.
pub(super) struct NewAccount<'a> {
    pub(super) username: &'a str,
    pub(super) email: &'a str,
    pub(super) password_hash: &'a str,
    pub(super) first_name: Option<&'a str>,
    pub(super) last_name: Option<&'a str>,
}

/// Outcome of inserting a new account; duplicates are told apart by the
/// violated constraint so concurrent registrations race safely.
#[derive(Debug)]
pub(super) enum InsertOutcome {
    Created(Uuid),
    DuplicateUsername,
    DuplicateEmail,
}

fn map_account(row: &sqlx::postgres::PgRow) -> AccountRecord {
    AccountRecord {
        id: row.get("id"),
        username: row.get("username"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        is_active: row.get("is_active"),
    }
}

/// Resolve a login-time identifier: email when it contains `@`, username
/// otherwise. Shared by login, reset-request, and reset-confirm.
pub(super) async fn lookup_by_identifier(
    pool: &PgPool,
    identifier: &str,
) -> Result<Option<AccountRecord>> {
    match identifier_kind(identifier) {
        IdentifierKind::Email => lookup_by_email(pool, &identifier.trim().to_lowercase()).await,
        IdentifierKind::Username => lookup_by_username(pool, identifier.trim()).await,
    }
}

pub(super) async fn lookup_by_username(
    pool: &PgPool,
    username: &str,
) -> Result<Option<AccountRecord>> {
    let query = format!("SELECT {ACCOUNT_COLUMNS} FROM users WHERE username = $1");
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = %query
    );
    let row = sqlx::query(&query)
        .bind(username)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup account by username")?;
    Ok(row.as_ref().map(map_account))
}

pub(super) async fn lookup_by_email(
    pool: &PgPool,
    email: &str,
) -> Result<Option<AccountRecord>> {
    let query = format!("SELECT {ACCOUNT_COLUMNS} FROM users WHERE email = $1");
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = %query
    );
    let row = sqlx::query(&query)
        .bind(email)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup account by email")?;
    Ok(row.as_ref().map(map_account))
}

pub(super) async fn username_exists(tx: &mut PgTx<'_>, username: &str) -> Result<bool> {
    let query = "SELECT EXISTS(SELECT 1 FROM users WHERE username = $1) AS exists";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(username)
        .fetch_one(&mut **tx)
        .instrument(span)
        .await
        .context("failed to check username existence")?;
    Ok(row.get("exists"))
}

pub(super) async fn email_exists(tx: &mut PgTx<'_>, email: &str) -> Result<bool> {
    let query = "SELECT EXISTS(SELECT 1 FROM users WHERE email = $1) AS exists";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .fetch_one(&mut **tx)
        .instrument(span)
        .await
        .context("failed to check email existence")?;
    Ok(row.get("exists"))
}

/// Insert an inactive account. The unique constraints are the backstop for
/// registrations racing past the existence pre-checks.
pub(super) async fn insert_account(
    tx: &mut PgTx<'_>,
    account: &NewAccount<'_>,
) -> Result<InsertOutcome> {
    let query = r"
        INSERT INTO users
            (username, email, password_hash, first_name, last_name, is_active)
        VALUES ($1, $2, $3, $4, $5, FALSE)
        RETURNING id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(account.username)
        .bind(account.email)
        .bind(account.password_hash)
        .bind(account.first_name)
        .bind(account.last_name)
        .fetch_one(&mut **tx)
        .instrument(span)
        .await;

    match row {
        Ok(row) => Ok(InsertOutcome::Created(row.get("id"))),
        Err(err) if is_unique_violation(&err) => {
            match violated_constraint(&err).as_deref() {
                Some("users_username_key") => Ok(InsertOutcome::DuplicateUsername),
                Some("users_email_key") => Ok(InsertOutcome::DuplicateEmail),
                _ => Err(err).context("unexpected unique violation inserting account"),
            }
        }
        Err(err) => Err(err).context("failed to insert account"),
    }
}

/// Replace the account's passcode: delete any prior row, insert a fresh code
/// with `expires_at = NOW() + ttl`. Returns the plaintext code for the
/// notification payload only.
pub(super) async fn replace_passcode(
    tx: &mut PgTx<'_>,
    user_id: Uuid,
    config: &AuthConfig,
) -> Result<String> {
    let query = "DELETE FROM one_time_passcodes WHERE user_id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to delete prior passcode")?;

    let code = generate_passcode();
    let query = r"
        INSERT INTO one_time_passcodes (user_id, code, expires_at)
        VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 second'))
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(&code)
        .bind(config.otp_ttl_seconds())
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to insert passcode")?;

    Ok(code)
}

/// Fetch the account's passcode, locked for the rest of the transaction so
/// concurrent submissions cannot both consume it.
pub(super) async fn fetch_passcode_for_update(
    tx: &mut PgTx<'_>,
    user_id: Uuid,
) -> Result<Option<PasscodeRecord>> {
    let query = r"
        SELECT code, expires_at
        FROM one_time_passcodes
        WHERE user_id = $1
        FOR UPDATE
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .context("failed to fetch passcode")?;

    Ok(row.map(|row| PasscodeRecord {
        code: row.get("code"),
        expires_at: row.get("expires_at"),
    }))
}

/// Consume the passcode; called only after a successful check.
pub(super) async fn delete_passcode(tx: &mut PgTx<'_>, user_id: Uuid) -> Result<()> {
    let query = "DELETE FROM one_time_passcodes WHERE user_id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to delete passcode")?;
    Ok(())
}

/// The one-and-only activation transition.
pub(super) async fn activate_account(tx: &mut PgTx<'_>, user_id: Uuid) -> Result<()> {
    let query = r"
        UPDATE users
        SET is_active = TRUE,
            updated_at = NOW()
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to activate account")?;
    Ok(())
}

/// Store a new password hash; activation state is untouched.
pub(super) async fn update_password(
    tx: &mut PgTx<'_>,
    user_id: Uuid,
    password_hash: &str,
) -> Result<()> {
    let query = r"
        UPDATE users
        SET password_hash = $2,
            updated_at = NOW()
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(password_hash)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to update password")?;
    Ok(())
}

/// Enqueue a passcode notification in the outbox. Runs inside the same
/// transaction as the account mutation, so the operation fails whole if the
/// notification cannot be queued.
pub(super) async fn enqueue_passcode_email(
    tx: &mut PgTx<'_>,
    to_email: &str,
    username: &str,
    template: &str,
    code: &str,
) -> Result<()> {
    let payload = json!({
        "username": username,
        "email": to_email,
        "code": code,
    });
    let payload_text =
        serde_json::to_string(&payload).context("failed to serialize email payload")?;

    let query = r"
        INSERT INTO email_outbox (to_email, template, payload_json)
        VALUES ($1, $2, $3::jsonb)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(to_email)
        .bind(template)
        .bind(payload_text)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to insert email outbox row")?;
    Ok(())
}

/// Look up the email registered for a username.
pub(crate) async fn email_by_username(pool: &PgPool, username: &str) -> Result<Option<String>> {
    let query = "SELECT email FROM users WHERE username = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(username)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup email by username")?;
    Ok(row.map(|row| row.get("email")))
}

/// Resolve a federated login to an account, creating one on first sight.
///
/// New federated accounts are active immediately (trust is inherited from the
/// provider), carry no password, and get a username derived from the email
/// local part with a random suffix retry when taken. An email collision on
/// insert means another request created the account concurrently; re-read and
/// use that row.
pub(super) async fn find_or_create_federated(
    pool: &PgPool,
    email: &str,
    subject: &str,
) -> Result<AccountRecord> {
    if let Some(account) = lookup_by_email(pool, email).await? {
        record_google_subject(pool, account.id, subject).await?;
        return Ok(account);
    }

    let base = username_from_email(email);
    let mut candidate = base.clone();
    for attempt in 0..4 {
        let query = r"
            INSERT INTO users
                (username, email, google_subject, is_active)
            VALUES ($1, $2, $3, TRUE)
            RETURNING id, username, email, password_hash, is_active
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(&candidate)
            .bind(email)
            .bind(subject)
            .fetch_one(pool)
            .instrument(span)
            .await;

        match row {
            Ok(row) => return Ok(map_account(&row)),
            Err(err) if is_unique_violation(&err) => {
                match violated_constraint(&err).as_deref() {
                    Some("users_username_key") => {
                        candidate = format!("{base}{}", username_suffix());
                    }
                    _ => {
                        // Email (or subject) raced into existence; use that account.
                        if let Some(account) = lookup_by_email(pool, email).await? {
                            return Ok(account);
                        }
                        return Err(err)
                            .context("unique violation without a matching federated account");
                    }
                }
            }
            Err(err) => {
                return Err(err).context(format!(
                    "failed to create federated account (attempt {attempt})"
                ));
            }
        }
    }

    Err(anyhow::anyhow!(
        "failed to pick a free username for federated account"
    ))
}

/// Remember the provider's stable subject id the first time we see it.
async fn record_google_subject(pool: &PgPool, user_id: Uuid, subject: &str) -> Result<()> {
    let query = r"
        UPDATE users
        SET google_subject = $2,
            updated_at = NOW()
        WHERE id = $1
          AND google_subject IS NULL
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(subject)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to record federated subject")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_outcome_debug_names() {
        assert_eq!(
            format!("{:?}", InsertOutcome::Created(Uuid::nil())),
            format!("Created({})", Uuid::nil())
        );
        assert_eq!(
            format!("{:?}", InsertOutcome::DuplicateUsername),
            "DuplicateUsername"
        );
        assert_eq!(
            format!("{:?}", InsertOutcome::DuplicateEmail),
            "DuplicateEmail"
        );
    }

    #[test]
    fn account_record_holds_values() {
        let record = AccountRecord {
            id: Uuid::nil(),
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
            password_hash: None,
            is_active: true,
        };
        assert_eq!(record.id, Uuid::nil());
        assert!(record.password_hash.is_none());
        assert!(record.is_active);
    }
}

//! Small helpers for auth validation, identifiers, and token handling.

use anyhow::{Context, Result};
use base64::Engine;
use rand::{Rng, RngCore, rngs::OsRng};
use regex::Regex;
use sha2::{Digest, Sha256};

/// Login-time identifier: an email when it contains `@`, a username
/// otherwise. The same rule is applied by login, reset-request, and
/// reset-confirm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum IdentifierKind {
    Email,
    Username,
}

pub(super) fn identifier_kind(identifier: &str) -> IdentifierKind {
    if identifier.contains('@') {
        IdentifierKind::Email
    } else {
        IdentifierKind::Username
    }
}

/// Normalize an email for lookup/uniqueness checks.
pub(super) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
pub(super) fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

/// Usernames are 3-32 characters, alphanumeric with underscores.
pub(super) fn valid_username(username: &str) -> bool {
    Regex::new(r"^[A-Za-z0-9_]{3,32}$").is_ok_and(|regex| regex.is_match(username))
}

/// Passwords arrive in plaintext over TLS; only length is enforced here.
pub(super) fn valid_password(password: &str) -> bool {
    (8..=128).contains(&password.chars().count())
}

/// Create a new opaque session token (refresh or access).
/// The raw value is only returned to the caller; the database stores a hash.
pub(super) fn generate_opaque_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate opaque token")?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

/// Hash an opaque token so raw values never touch the database.
pub(super) fn hash_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

/// Derive a username candidate from an email local part: keep word
/// characters, lowercase, cap the length. Falls back to `user` when nothing
/// usable remains.
pub(super) fn username_from_email(email: &str) -> String {
    let local = email.split('@').next().unwrap_or_default();
    let mut candidate: String = local
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .map(|c| c.to_ascii_lowercase())
        .take(24)
        .collect();
    if candidate.len() < 3 {
        candidate = format!("user{candidate}");
    }
    candidate
}

/// Four random digits appended when a generated username is taken.
pub(super) fn username_suffix() -> String {
    OsRng.gen_range(1000..10_000u32).to_string()
}

pub(super) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

/// Name of the violated constraint, used to tell a duplicate username from a
/// duplicate email when two registrations race.
pub(super) fn violated_constraint(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db_err) => db_err.constraint().map(str::to_string),
        _ => None,
    }
}

/// Extract a client IP for rate limiting from common proxy headers.
pub(super) fn extract_client_ip(headers: &axum::http::HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, HeaderValue};
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    #[test]
    fn identifier_kind_by_at_sign() {
        assert_eq!(identifier_kind("alice@example.com"), IdentifierKind::Email);
        assert_eq!(identifier_kind("alice"), IdentifierKind::Username);
        // Anything containing @ goes down the email path, even if malformed.
        assert_eq!(identifier_kind("@"), IdentifierKind::Email);
    }

    #[test]
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(normalize_email(" Alice@Example.COM "), "alice@example.com");
    }

    #[test]
    fn valid_email_accepts_basic_format() {
        assert!(valid_email("a@example.com"));
        assert!(valid_email("name.surname@example.co"));
    }

    #[test]
    fn valid_email_rejects_missing_parts() {
        assert!(!valid_email("not-an-email"));
        assert!(!valid_email("missing-at.example.com"));
        assert!(!valid_email("missing-domain@"));
    }

    #[test]
    fn valid_username_rules() {
        assert!(valid_username("alice"));
        assert!(valid_username("alice_01"));
        assert!(!valid_username("al"));
        assert!(!valid_username("alice.smith"));
        assert!(!valid_username(&"a".repeat(33)));
    }

    #[test]
    fn valid_password_length_bounds() {
        assert!(!valid_password("short"));
        assert!(valid_password("longenough"));
        assert!(!valid_password(&"a".repeat(129)));
    }

    #[test]
    fn generate_opaque_token_round_trip() {
        let decoded_len = generate_opaque_token()
            .ok()
            .and_then(|token| URL_SAFE_NO_PAD.decode(token.as_bytes()).ok())
            .map(|bytes| bytes.len());
        assert_eq!(decoded_len, Some(32));
    }

    #[test]
    fn hash_token_stable() {
        let first = hash_token("token");
        let second = hash_token("token");
        let different = hash_token("other");
        assert_eq!(first, second);
        assert_ne!(first, different);
    }

    #[test]
    fn username_from_email_sanitizes() {
        assert_eq!(username_from_email("alice@example.com"), "alice");
        assert_eq!(username_from_email("Alice.Smith@example.com"), "alicesmith");
        assert_eq!(username_from_email("a@example.com"), "usera");
        assert_eq!(username_from_email("@example.com"), "user");
        let long = format!("{}@example.com", "x".repeat(40));
        assert_eq!(username_from_email(&long).len(), 24);
    }

    #[test]
    fn username_suffix_is_four_digits() {
        for _ in 0..16 {
            let suffix = username_suffix();
            assert_eq!(suffix.len(), 4);
            assert!(suffix.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn is_unique_violation_only_for_sqlstate_23505() {
        let err = sqlx::Error::RowNotFound;
        assert!(!is_unique_violation(&err));
        assert!(violated_constraint(&err).is_none());
    }

    #[test]
    fn extract_client_ip_prefers_forwarded() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("1.2.3.4, 5.6.7.8"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("9.9.9.9"));
        assert_eq!(extract_client_ip(&headers), Some("1.2.3.4".to_string()));
    }

    #[test]
    fn extract_client_ip_falls_back_to_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("9.9.9.9"));
        assert_eq!(extract_client_ip(&headers), Some("9.9.9.9".to_string()));
    }

    #[test]
    fn extract_client_ip_none_when_missing() {
        let headers = HeaderMap::new();
        assert_eq!(extract_client_ip(&headers), None);
    }
}

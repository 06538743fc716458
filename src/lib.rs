//! # Sesamo (User Accounts & Authentication)
//!
//! `sesamo` owns the account lifecycle for a product's user base:
//! registration, email verification, login, password reset, Google sign-in,
//! and session token revocation.
//!
//! ## Account Lifecycle
//!
//! Accounts are created inactive. A six-digit one-time passcode is delivered
//! by email and activates the account exactly once; until then the account
//! cannot log in. Password resets reuse the same passcode machinery and do
//! not change the activation state.
//!
//! - **One live passcode:** each account has at most one passcode at any
//!   time; issuing a new one replaces the old one.
//! - **Single use:** a passcode that verifies successfully is consumed in
//!   the same transaction; expiry is checked before equality, so an
//!   expired-but-correct code reports expired.
//!
//! ## Sessions
//!
//! Successful logins (password or Google) return an opaque refresh/access
//! token pair. Only SHA-256 hashes of the tokens touch the database. Logout
//! revokes the refresh token permanently; a revoked refresh token can never
//! mint another access token.
//!
//! ## Enumeration Posture
//!
//! Login and OTP verification return one generic error for unknown accounts
//! and wrong credentials. Password-reset requests and the email lookup
//! endpoint intentionally report `404 Not Found` for unknown accounts.

pub mod api;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

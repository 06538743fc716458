//! Auth handlers and supporting modules.
//!
//! This module owns the account lifecycle: registration with email passcode
//! verification, credential login, Google sign-in, password reset, and
//! refresh-token revocation.
//!
//! ## Passcodes
//!
//! Each account has at most one live six-digit passcode; issuing a new one
//! replaces the previous one inside the same transaction. Verification
//! evaluates expiry before equality and consumes the passcode only on
//! success.
//!
//! ## Tokens
//!
//! Logins mint an opaque refresh/access pair. Only SHA-256 hashes are stored;
//! the raw values appear once in the login response. Revoking a refresh token
//! is permanent.

pub(crate) mod google;
pub(crate) mod login;
mod otp;
mod password;
mod rate_limit;
pub(crate) mod register;
pub(crate) mod reset;
pub(crate) mod session;
mod state;
pub(crate) mod storage;
mod tokens;
pub(crate) mod types;
mod utils;
pub(crate) mod verification;

pub use rate_limit::{FixedWindowRateLimiter, NoopRateLimiter};
pub use state::{AuthConfig, AuthState};

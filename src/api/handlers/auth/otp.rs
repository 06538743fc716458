//! One-time passcode generation and evaluation.

use chrono::{DateTime, Utc};
use rand::{Rng, rngs::OsRng};

pub(super) const PASSCODE_LENGTH: usize = 6;

/// A stored passcode as fetched from the database.
#[derive(Debug, Clone)]
pub(super) struct PasscodeRecord {
    pub(super) code: String,
    pub(super) expires_at: DateTime<Utc>,
}

/// Result of evaluating a submitted code against the stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum PasscodeCheck {
    Ok,
    Expired,
    Mismatch,
    NotFound,
}

/// Six digits, each drawn uniformly. Collisions across accounts are fine;
/// uniqueness is only per-account via the one-live-code invariant.
pub(super) fn generate_passcode() -> String {
    let mut rng = OsRng;
    (0..PASSCODE_LENGTH)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}

/// Evaluate a submitted code.
///
/// Expiry is checked before equality, so an expired-but-correct code reports
/// `Expired`, never `Ok`. Only `Ok` entitles the caller to consume the row;
/// `Expired` and `Mismatch` leave it in place.
pub(super) fn check_passcode(
    record: Option<&PasscodeRecord>,
    submitted: &str,
    now: DateTime<Utc>,
) -> PasscodeCheck {
    let Some(record) = record else {
        return PasscodeCheck::NotFound;
    };
    if now > record.expires_at {
        return PasscodeCheck::Expired;
    }
    if record.code != submitted {
        return PasscodeCheck::Mismatch;
    }
    PasscodeCheck::Ok
}

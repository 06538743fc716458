//! Rate limiting primitives for auth flows.
//!
//! Limiting is a precondition gate applied by the handlers before the account
//! state machine runs; denials never enter the auth error taxonomy.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(60);
// Bound the key map so unattributable traffic cannot grow it forever.
const MAX_TRACKED_KEYS: usize = 10_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RateLimitAction {
    Register,
    Login,
    ResetRequest,
}

impl RateLimitAction {
    /// Requests allowed per window, per client IP.
    const fn limit(self) -> u32 {
        match self {
            Self::Register | Self::ResetRequest => 5,
            Self::Login => 10,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited,
}

pub trait RateLimiter: Send + Sync {
    fn check_ip(&self, ip: Option<&str>, action: RateLimitAction) -> RateLimitDecision;
}

struct Window {
    started: Instant,
    count: u32,
}

/// In-memory fixed-window limiter keyed by (action, client IP).
pub struct FixedWindowRateLimiter {
    windows: Mutex<HashMap<(RateLimitAction, String), Window>>,
}

impl FixedWindowRateLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
        }
    }

    fn check_at(
        &self,
        ip: Option<&str>,
        action: RateLimitAction,
        now: Instant,
    ) -> RateLimitDecision {
        // Requests without an attributable client are not limited.
        let Some(ip) = ip else {
            return RateLimitDecision::Allowed;
        };

        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if windows.len() >= MAX_TRACKED_KEYS {
            windows.retain(|_, window| now.duration_since(window.started) < WINDOW);
        }

        let window = windows
            .entry((action, ip.to_string()))
            .or_insert(Window { started: now, count: 0 });

        if now.duration_since(window.started) >= WINDOW {
            window.started = now;
            window.count = 0;
        }

        if window.count >= action.limit() {
            return RateLimitDecision::Limited;
        }
        window.count += 1;
        RateLimitDecision::Allowed
    }
}

impl Default for FixedWindowRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter for FixedWindowRateLimiter {
    fn check_ip(&self, ip: Option<&str>, action: RateLimitAction) -> RateLimitDecision {
        self.check_at(ip, action, Instant::now())
    }
}

#[derive(Clone, Debug)]
pub struct NoopRateLimiter;

impl RateLimiter for NoopRateLimiter {
    fn check_ip(&self, _ip: Option<&str>, _action: RateLimitAction) -> RateLimitDecision {
        RateLimitDecision::Allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_rate_limiter_allows() {
        let limiter = NoopRateLimiter;
        assert_eq!(
            limiter.check_ip(None, RateLimitAction::Register),
            RateLimitDecision::Allowed
        );
        assert_eq!(
            limiter.check_ip(Some("1.2.3.4"), RateLimitAction::Login),
            RateLimitDecision::Allowed
        );
    }

    #[test]
    fn unattributable_requests_are_allowed() {
        let limiter = FixedWindowRateLimiter::new();
        for _ in 0..100 {
            assert_eq!(
                limiter.check_ip(None, RateLimitAction::Register),
                RateLimitDecision::Allowed
            );
        }
    }

    #[test]
    fn limits_after_threshold_within_window() {
        let limiter = FixedWindowRateLimiter::new();
        let now = Instant::now();
        for _ in 0..RateLimitAction::Register.limit() {
            assert_eq!(
                limiter.check_at(Some("1.2.3.4"), RateLimitAction::Register, now),
                RateLimitDecision::Allowed
            );
        }
        assert_eq!(
            limiter.check_at(Some("1.2.3.4"), RateLimitAction::Register, now),
            RateLimitDecision::Limited
        );
        // A different client is unaffected.
        assert_eq!(
            limiter.check_at(Some("5.6.7.8"), RateLimitAction::Register, now),
            RateLimitDecision::Allowed
        );
        // As is a different action for the same client.
        assert_eq!(
            limiter.check_at(Some("1.2.3.4"), RateLimitAction::Login, now),
            RateLimitDecision::Allowed
        );
    }

    #[test]
    fn window_resets_after_expiry() {
        let limiter = FixedWindowRateLimiter::new();
        let now = Instant::now();
        for _ in 0..RateLimitAction::ResetRequest.limit() {
            limiter.check_at(Some("1.2.3.4"), RateLimitAction::ResetRequest, now);
        }
        assert_eq!(
            limiter.check_at(Some("1.2.3.4"), RateLimitAction::ResetRequest, now),
            RateLimitDecision::Limited
        );
        let later = now + WINDOW + Duration::from_secs(1);
        assert_eq!(
            limiter.check_at(Some("1.2.3.4"), RateLimitAction::ResetRequest, later),
            RateLimitDecision::Allowed
        );
    }

    #[test]
    fn login_allows_more_than_register() {
        assert!(RateLimitAction::Login.limit() > RateLimitAction::Register.limit());
    }
}

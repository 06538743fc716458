//! Auth configuration and shared state.

use std::sync::Arc;

use super::rate_limit::RateLimiter;

const DEFAULT_OTP_TTL_SECONDS: i64 = 10 * 60;
const DEFAULT_ACCESS_TOKEN_TTL_SECONDS: i64 = 15 * 60;
const DEFAULT_REFRESH_TOKEN_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    otp_ttl_seconds: i64,
    access_token_ttl_seconds: i64,
    refresh_token_ttl_seconds: i64,
}

impl AuthConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            otp_ttl_seconds: DEFAULT_OTP_TTL_SECONDS,
            access_token_ttl_seconds: DEFAULT_ACCESS_TOKEN_TTL_SECONDS,
            refresh_token_ttl_seconds: DEFAULT_REFRESH_TOKEN_TTL_SECONDS,
        }
    }

    #[must_use]
    pub fn with_otp_ttl_seconds(mut self, seconds: i64) -> Self {
        self.otp_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_access_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_refresh_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.refresh_token_ttl_seconds = seconds;
        self
    }

    pub(super) fn otp_ttl_seconds(&self) -> i64 {
        self.otp_ttl_seconds
    }

    pub(super) fn access_token_ttl_seconds(&self) -> i64 {
        self.access_token_ttl_seconds
    }

    pub(super) fn refresh_token_ttl_seconds(&self) -> i64 {
        self.refresh_token_ttl_seconds
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::new()
    }
}

pub struct AuthState {
    config: AuthConfig,
    rate_limiter: Arc<dyn RateLimiter>,
}

impl AuthState {
    pub fn new(config: AuthConfig, rate_limiter: Arc<dyn RateLimiter>) -> Self {
        Self {
            config,
            rate_limiter,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub(super) fn rate_limiter(&self) -> &dyn RateLimiter {
        self.rate_limiter.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::super::rate_limit::{NoopRateLimiter, RateLimitAction, RateLimitDecision};
    use super::*;

    #[test]
    fn auth_config_defaults_and_overrides() {
        let config = AuthConfig::new();

        assert_eq!(config.otp_ttl_seconds(), DEFAULT_OTP_TTL_SECONDS);
        assert_eq!(
            config.access_token_ttl_seconds(),
            DEFAULT_ACCESS_TOKEN_TTL_SECONDS
        );
        assert_eq!(
            config.refresh_token_ttl_seconds(),
            DEFAULT_REFRESH_TOKEN_TTL_SECONDS
        );

        let config = config
            .with_otp_ttl_seconds(120)
            .with_access_token_ttl_seconds(60)
            .with_refresh_token_ttl_seconds(3600);

        assert_eq!(config.otp_ttl_seconds(), 120);
        assert_eq!(config.access_token_ttl_seconds(), 60);
        assert_eq!(config.refresh_token_ttl_seconds(), 3600);
    }

    #[test]
    fn access_ttl_is_shorter_than_refresh_ttl_by_default() {
        let config = AuthConfig::new();
        assert!(config.access_token_ttl_seconds() < config.refresh_token_ttl_seconds());
    }

    #[test]
    fn auth_state_constructs_with_noop_rate_limiter() {
        let state = AuthState::new(AuthConfig::new(), Arc::new(NoopRateLimiter));
        assert_eq!(
            state
                .rate_limiter()
                .check_ip(Some("1.2.3.4"), RateLimitAction::Login),
            RateLimitDecision::Allowed
        );
    }
}

//! API handlers and shared utilities for Sesamo.
//!
//! This module organizes the service's route handlers and hosts the Google
//! ID-token verifier used by the federated login endpoint.

pub mod auth;
pub mod health;
pub mod root;
pub mod users;

use anyhow::{Context, Result, anyhow};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use reqwest::Client;
use serde::Deserialize;
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant, SystemTime},
};
use tokio::sync::RwLock;
use tracing::{Instrument, error, info, info_span, warn};
use url::Url;

// Key-set caching: keep Google's signing keys in memory with a TTL; refresh on
// stale cache or unknown kid. If refresh fails, keep the last known keys so
// verification keeps working.
const KEYSET_CACHE_TTL_SECONDS: u64 = 3600;
const KEYSET_REFRESH_COOLDOWN_SECONDS: u64 = 60;

// Google signs ID tokens with either issuer form depending on the flow.
const GOOGLE_ISSUERS: [&str; 2] = ["https://accounts.google.com", "accounts.google.com"];

/// One RSA signing key from the provider's JWKS document.
#[derive(Debug, Clone, Deserialize)]
pub struct GoogleKey {
    pub kid: String,
    pub kty: String,
    pub n: String,
    pub e: String,
    #[serde(default)]
    pub alg: Option<String>,
}

/// The provider's published key set.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GoogleKeySet {
    pub keys: Vec<GoogleKey>,
}

impl GoogleKeySet {
    fn find(&self, kid: &str) -> Option<&GoogleKey> {
        self.keys.iter().find(|key| key.kid == kid)
    }
}

/// Claims extracted from a verified Google ID token.
///
/// Only the fields the account state machine needs; signature, issuer,
/// audience, and expiry are enforced before these are returned.
#[derive(Debug, Clone, Deserialize)]
pub struct GoogleClaims {
    /// Stable subject id assigned by the provider.
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: Option<bool>,
}

#[derive(Debug)]
enum KeySource {
    /// Key set provided directly and never refreshed.
    Static,
    /// Key set fetched from the provider's JWKS URL and refreshed as needed.
    Remote { url: String, client: Client },
}

#[derive(Debug, Clone)]
struct KeyCache {
    keys: GoogleKeySet,
    fetched_at: Instant,
}

impl KeyCache {
    /// Keys are fresh if within TTL; stale keys trigger a refresh attempt.
    fn is_fresh(&self) -> bool {
        self.fetched_at.elapsed() < Duration::from_secs(KEYSET_CACHE_TTL_SECONDS)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DependencyStatus {
    /// Remote key set is reachable and the fetch succeeded.
    Ok,
    /// Remote key set is unreachable or the fetch failed.
    Error,
    /// Static key set means no external dependency.
    Static,
}

impl DependencyStatus {
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
            Self::Static => "static",
        }
    }

    pub(crate) const fn is_healthy(self) -> bool {
        !matches!(self, Self::Error)
    }
}

/// Verifies Google ID tokens against a cached copy of Google's JWKS.
///
/// Used by the federated login handler to validate tokens offline and by
/// `/health` to report dependency status when the key set is fetched
/// remotely. Verification fails closed: any fetch, parse, or signature
/// problem yields no claims.
#[derive(Debug)]
pub struct GoogleVerifier {
    key_source: KeySource,
    key_cache: RwLock<KeyCache>,
    /// Expected token audience (the OAuth client id).
    audience: String,
    /// Timestamp to throttle refresh attempts on unknown kid.
    last_refresh_unix: AtomicU64,
}

impl GoogleVerifier {
    /// Build from a static key set (tests, air-gapped setups), no refresh.
    #[must_use]
    pub fn new(keys: GoogleKeySet, audience: String) -> Self {
        Self {
            key_source: KeySource::Static,
            key_cache: RwLock::new(KeyCache {
                keys,
                fetched_at: Instant::now(),
            }),
            audience,
            last_refresh_unix: AtomicU64::new(0),
        }
    }

    /// Build a verifier that fetches the key set from the provider's JWKS URL.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the HTTP client cannot be built.
    pub async fn new_remote(url: String, audience: String) -> Result<Self> {
        let parsed = Url::parse(&url).context("Invalid JWKS URL")?;
        if parsed.scheme() != "https" {
            return Err(anyhow!("JWKS URL must use https: {url}"));
        }

        let client = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .build()
            .context("Failed to build JWKS HTTP client")?;

        // Startup fetch is best-effort: if the provider isn't reachable yet,
        // start with an empty, stale cache so /health stays red and
        // verification fails closed until a refresh succeeds.
        let (keys, fetched_at, last_refresh_unix) = match fetch_keys(&client, &url).await {
            Ok(keys) => (keys, Instant::now(), now_unix_seconds_u64()),
            Err(err) => {
                warn!(
                    url = %url,
                    error = %err,
                    "JWKS fetch failed during startup; continuing with empty key set"
                );
                (GoogleKeySet::default(), stale_instant(), 0)
            }
        };

        Ok(Self {
            key_source: KeySource::Remote { url, client },
            key_cache: RwLock::new(KeyCache { keys, fetched_at }),
            audience,
            last_refresh_unix: AtomicU64::new(last_refresh_unix),
        })
    }

    /// Return the configured audience for ID-token verification.
    #[must_use]
    pub fn audience(&self) -> &str {
        &self.audience
    }

    /// Verify an ID token and return its claims if everything checks out.
    ///
    /// Flow: use cached keys; on unknown `kid`, refresh (with cooldown) and
    /// retry once. Tokens whose `email_verified` claim is `false` are
    /// rejected because the email is trusted for immediate activation.
    pub async fn verify(&self, token: &str) -> Option<GoogleClaims> {
        let header = match decode_header(token) {
            Ok(header) => header,
            Err(err) => {
                error!("Failed to decode identity token header: {err}");
                return None;
            }
        };
        let kid = header.kid?;

        let keys = self.keys_snapshot().await;
        if let Some(claims) = self.try_verify_with(&keys, &kid, token) {
            return self.accept_claims(claims);
        }

        // The key may have rotated; refresh once (with cooldown) and retry.
        match self.refresh_on_unknown_kid().await {
            Ok(true) => {
                let keys = self.keys_snapshot().await;
                let claims = self.try_verify_with(&keys, &kid, token)?;
                self.accept_claims(claims)
            }
            Ok(false) => {
                warn!(kid = %kid, "identity token kid not found and refresh suppressed");
                None
            }
            Err(err) => {
                error!("JWKS refresh failed: {err}");
                None
            }
        }
    }

    fn try_verify_with(&self, keys: &GoogleKeySet, kid: &str, token: &str) -> Option<GoogleClaims> {
        let key = keys.find(kid)?;
        let decoding_key = match DecodingKey::from_rsa_components(&key.n, &key.e) {
            Ok(decoding_key) => decoding_key,
            Err(err) => {
                error!(kid = %kid, "Invalid RSA components in key set: {err}");
                return None;
            }
        };

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[self.audience.as_str()]);
        validation.set_issuer(&GOOGLE_ISSUERS);

        match decode::<GoogleClaims>(token, &decoding_key, &validation) {
            Ok(data) => Some(data.claims),
            Err(err) => {
                error!("Identity token verification failed: {err}");
                None
            }
        }
    }

    fn accept_claims(&self, claims: GoogleClaims) -> Option<GoogleClaims> {
        if claims.email_verified == Some(false) {
            // An unverified email claim would bypass the OTP trust boundary.
            warn!(sub = %claims.sub, "rejecting identity token with unverified email");
            return None;
        }
        Some(claims)
    }

    /// Return a key-set snapshot; refresh if stale, keep cache if refresh fails.
    async fn keys_snapshot(&self) -> GoogleKeySet {
        let (cached, fresh) = {
            let cache = self.key_cache.read().await;
            (cache.keys.clone(), cache.is_fresh())
        };

        if fresh {
            return cached;
        }

        if let KeySource::Remote { url, .. } = &self.key_source
            && let Err(err) = self.refresh_keys().await
        {
            // Refresh failure shouldn't break verification; keep using the last cached keys.
            warn!(
                error = %err,
                url = %url,
                "failed to refresh JWKS cache"
            );
            return cached;
        }

        let cache = self.key_cache.read().await;
        cache.keys.clone()
    }

    /// Fetch the key set from the provider and update the in-memory cache.
    async fn refresh_keys(&self) -> Result<()> {
        let (url, client) = match &self.key_source {
            KeySource::Static => return Ok(()),
            KeySource::Remote { url, client } => (url.clone(), client.clone()),
        };

        let keys = fetch_keys(&client, &url).await?;
        let mut cache = self.key_cache.write().await;
        cache.keys = keys;
        cache.fetched_at = Instant::now();
        info!(key_count = cache.keys.keys.len(), "JWKS cache refreshed");
        Ok(())
    }

    /// Report dependency status for `/health` by attempting a refresh.
    pub(crate) async fn dependency_status(&self) -> DependencyStatus {
        match &self.key_source {
            KeySource::Static => DependencyStatus::Static,
            KeySource::Remote { url, .. } => match self.refresh_keys().await {
                Ok(()) => DependencyStatus::Ok,
                Err(err) => {
                    warn!(
                        error = %err,
                        url = %url,
                        "JWKS fetch failed during health check"
                    );
                    DependencyStatus::Error
                }
            },
        }
    }

    /// Refresh if a token `kid` is unknown, with cooldown to avoid hammering
    /// the provider when many unknown-kid tokens arrive.
    async fn refresh_on_unknown_kid(&self) -> Result<bool> {
        if matches!(&self.key_source, KeySource::Static) {
            return Ok(false);
        }
        let now = now_unix_seconds_u64();
        let last = self.last_refresh_unix.load(Ordering::Relaxed);
        if now.saturating_sub(last) < KEYSET_REFRESH_COOLDOWN_SECONDS {
            return Ok(false);
        }
        self.last_refresh_unix.store(now, Ordering::Relaxed);
        self.refresh_keys().await?;
        Ok(true)
    }
}

fn now_unix_seconds_u64() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Produce an Instant that is already stale to trigger an early refresh.
fn stale_instant() -> Instant {
    Instant::now()
        .checked_sub(Duration::from_secs(KEYSET_CACHE_TTL_SECONDS + 1))
        .unwrap_or_else(Instant::now)
}

/// Fetch the JWKS document and parse its JSON response.
async fn fetch_keys(client: &Client, url: &str) -> Result<GoogleKeySet> {
    let span = info_span!(
        "jwks.fetch",
        http.method = "GET",
        url = %url
    );
    async {
        let response = client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("JWKS fetch failed: {status}"));
        }
        let keys: GoogleKeySet = response.json().await.context("Invalid JWKS JSON")?;
        Ok(keys)
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn static_verifier(keys: GoogleKeySet) -> GoogleVerifier {
        GoogleVerifier::new(keys, "client-id.apps.googleusercontent.com".to_string())
    }

    #[test]
    fn keyset_parses_jwks_json() {
        let json = r#"{
            "keys": [
                {"kid": "abc", "kty": "RSA", "alg": "RS256", "n": "0vx7", "e": "AQAB"},
                {"kid": "def", "kty": "RSA", "n": "1vx8", "e": "AQAB"}
            ]
        }"#;
        let keys: GoogleKeySet = serde_json::from_str(json).expect("valid jwks");
        assert_eq!(keys.keys.len(), 2);
        assert!(keys.find("missing").is_none());
        let key = keys.find("abc").expect("kid abc present");
        assert_eq!(key.kty, "RSA");
        assert_eq!(key.alg.as_deref(), Some("RS256"));
        let key = keys.find("def").expect("kid def present");
        assert_eq!(key.alg, None);
    }

    #[tokio::test]
    async fn verify_rejects_garbage_token() {
        let verifier = static_verifier(GoogleKeySet::default());
        assert!(verifier.verify("not-a-jwt").await.is_none());
        assert!(verifier.verify("a.b.c").await.is_none());
    }

    #[tokio::test]
    async fn verify_rejects_unknown_kid_on_static_source() {
        // A structurally valid JWT header with a kid no static key set knows.
        // Header: {"alg":"RS256","kid":"nope"}
        let token = concat!(
            "eyJhbGciOiJSUzI1NiIsImtpZCI6Im5vcGUifQ.",
            "eyJzdWIiOiIxMjMifQ.",
            "c2ln"
        );
        let verifier = static_verifier(GoogleKeySet::default());
        assert!(verifier.verify(token).await.is_none());
    }

    #[tokio::test]
    async fn dependency_status_static() {
        let verifier = static_verifier(GoogleKeySet::default());
        assert_eq!(verifier.audience(), "client-id.apps.googleusercontent.com");
        assert_eq!(verifier.dependency_status().await, DependencyStatus::Static);
        assert!(DependencyStatus::Static.is_healthy());
        assert_eq!(DependencyStatus::Static.as_str(), "static");
    }

    #[tokio::test]
    async fn refresh_on_unknown_kid_skips_static_source() {
        let verifier = static_verifier(GoogleKeySet::default());
        let refreshed = verifier
            .refresh_on_unknown_kid()
            .await
            .expect("static refresh never errors");
        assert!(!refreshed);
    }

    #[test]
    fn unverified_email_claims_are_rejected() {
        let verifier = static_verifier(GoogleKeySet::default());
        let claims = GoogleClaims {
            sub: "123".to_string(),
            email: Some("alice@example.com".to_string()),
            email_verified: Some(false),
        };
        assert!(verifier.accept_claims(claims).is_none());

        let claims = GoogleClaims {
            sub: "123".to_string(),
            email: Some("alice@example.com".to_string()),
            email_verified: Some(true),
        };
        assert!(verifier.accept_claims(claims).is_some());
    }

    #[tokio::test]
    async fn new_remote_rejects_plain_http() {
        let result = GoogleVerifier::new_remote(
            "http://example.test/jwks.json".to_string(),
            "cid".to_string(),
        )
        .await;
        assert!(result.is_err());
    }
}

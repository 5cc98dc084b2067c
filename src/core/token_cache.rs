//! Short-lived credential cache with per-identity single-flight refresh.
//!
//! [`TokenCache::get_token`] serves a cached credential while it is valid. On a
//! miss or expiry the first caller starts a refresh; concurrent callers for the
//! same identity join it through a shared `tokio::sync::OnceCell` and receive the
//! same outcome. The table lock (`parking_lot::Mutex`) is only held to decide
//! hit / join / start and to write the result back, never across the issuer call.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::OnceCell;

use crate::core::{AppResult, GateError};
use crate::util::clock::{Clock, SystemClock};

/// Lifetime used when the issuer does not specify one.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(3600);

/// Longest lifetime the cache will honor; longer issuer lifetimes are capped.
pub const MAX_TOKEN_TTL: Duration = Duration::from_secs(10 * 365 * 24 * 3600);

/// Credential returned by a [`CredentialIssuer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCredential {
    /// Opaque credential string.
    pub credential: String,
    /// Lifetime chosen by the issuer; `None` falls back to the cache default.
    pub ttl: Option<Duration>,
}

impl IssuedCredential {
    /// Credential with an issuer-specified lifetime.
    pub fn new(credential: impl Into<String>, ttl: Duration) -> Self {
        Self {
            credential: credential.into(),
            ttl: Some(ttl),
        }
    }

    /// Credential that uses the cache's default lifetime.
    pub fn with_default_ttl(credential: impl Into<String>) -> Self {
        Self {
            credential: credential.into(),
            ttl: None,
        }
    }
}

/// Backend that mints credentials, typically a network call to an auth service.
///
/// Closures `Fn(String) -> impl Future<Output = AppResult<IssuedCredential>>`
/// implement this trait directly.
#[async_trait]
pub trait CredentialIssuer: Send + Sync + 'static {
    /// Issue a fresh credential for `identity`.
    async fn issue(&self, identity: &str) -> AppResult<IssuedCredential>;
}

#[async_trait]
impl<F, Fut> CredentialIssuer for F
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AppResult<IssuedCredential>> + Send + 'static,
{
    async fn issue(&self, identity: &str) -> AppResult<IssuedCredential> {
        (self)(identity.to_owned()).await
    }
}

/// Cached credential, handed out by value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRecord {
    /// Identity the credential belongs to.
    pub identity: String,
    /// Opaque credential string.
    pub credential: String,
    /// Instant after which the credential is no longer served; `None` never expires.
    pub expires_at: Option<Instant>,
}

impl TokenRecord {
    fn is_valid_at(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|expires_at| expires_at > now)
    }
}

type RefreshOutcome = Result<String, GateError>;
type Flight = Arc<OnceCell<RefreshOutcome>>;

#[derive(Default)]
struct CacheState {
    records: HashMap<String, TokenRecord>,
    in_flight: HashMap<String, Flight>,
}

/// Credential cache keyed by identity.
pub struct TokenCache<I> {
    issuer: I,
    default_ttl: Duration,
    clock: Arc<dyn Clock>,
    state: Mutex<CacheState>,
}

impl<I: CredentialIssuer> TokenCache<I> {
    /// Create a cache around `issuer`. `default_ttl` must be non-zero and
    /// no longer than [`MAX_TOKEN_TTL`].
    pub fn new(issuer: I, default_ttl: Duration) -> Result<Self, GateError> {
        if default_ttl.is_zero() {
            return Err(GateError::Config(
                "default token ttl must be greater than 0".into(),
            ));
        }
        if default_ttl > MAX_TOKEN_TTL {
            return Err(GateError::Config(format!(
                "default token ttl must not exceed {}s",
                MAX_TOKEN_TTL.as_secs()
            )));
        }
        Ok(Self {
            issuer,
            default_ttl,
            clock: Arc::new(SystemClock),
            state: Mutex::new(CacheState::default()),
        })
    }

    /// Replace the time source used for expiry.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Lifetime applied when the issuer leaves it unspecified.
    pub const fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Return a valid credential for `identity`, refreshing at most once per
    /// identity no matter how many callers arrive concurrently.
    pub async fn get_token(&self, identity: &str) -> Result<String, GateError> {
        let flight = {
            let mut state = self.state.lock();
            if let Some(record) = state.records.get(identity) {
                if record.is_valid_at(self.clock.now()) {
                    tracing::trace!(identity, "token cache hit");
                    return Ok(record.credential.clone());
                }
            }
            Arc::clone(
                state
                    .in_flight
                    .entry(identity.to_owned())
                    .or_insert_with(|| Arc::new(OnceCell::new())),
            )
        };

        flight
            .get_or_init(|| self.refresh(identity, &flight))
            .await
            .clone()
    }

    /// Issue a credential and write it back. Runs once per flight.
    async fn refresh(&self, identity: &str, flight: &Flight) -> RefreshOutcome {
        tracing::debug!(identity, "refreshing credential");
        let issued = self.issuer.issue(identity).await;

        let mut state = self.state.lock();
        if state
            .in_flight
            .get(identity)
            .is_some_and(|current| Arc::ptr_eq(current, flight))
        {
            state.in_flight.remove(identity);
        }

        match issued {
            Ok(issued) => {
                let ttl = issued.ttl.unwrap_or(self.default_ttl).min(MAX_TOKEN_TTL);
                let expires_at = self.clock.now().checked_add(ttl);
                state.records.insert(
                    identity.to_owned(),
                    TokenRecord {
                        identity: identity.to_owned(),
                        credential: issued.credential.clone(),
                        expires_at,
                    },
                );
                tracing::info!(identity, ttl_secs = ttl.as_secs(), "credential issued");
                Ok(issued.credential)
            }
            Err(e) => {
                tracing::warn!(identity, "credential issuance failed: {:#}", e);
                Err(GateError::Issuance {
                    identity: identity.to_owned(),
                    reason: format!("{e:#}"),
                })
            }
        }
    }

    /// Copy of the stored record for `identity`, expired or not.
    pub fn cached(&self, identity: &str) -> Option<TokenRecord> {
        self.state.lock().records.get(identity).cloned()
    }

    /// Drop the stored record so the next lookup re-issues.
    pub fn invalidate(&self, identity: &str) -> Option<TokenRecord> {
        self.state.lock().records.remove(identity)
    }

    /// Remove every expired record and return how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut state = self.state.lock();
        let before = state.records.len();
        state.records.retain(|_, record| record.is_valid_at(now));
        let removed = before - state.records.len();
        if removed > 0 {
            tracing::debug!(removed, "purged expired credentials");
        }
        removed
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    /// Whether no records are stored.
    pub fn is_empty(&self) -> bool {
        self.state.lock().records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::clock::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Default)]
    struct CountingIssuer {
        calls: Arc<AtomicUsize>,
        ttl: Option<Duration>,
    }

    #[async_trait]
    impl CredentialIssuer for CountingIssuer {
        async fn issue(&self, identity: &str) -> AppResult<IssuedCredential> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(IssuedCredential {
                credential: format!("{identity}-{n}"),
                ttl: self.ttl,
            })
        }
    }

    #[tokio::test]
    async fn test_hit_does_not_reissue() {
        let issuer = CountingIssuer::default();
        let calls = Arc::clone(&issuer.calls);
        let cache = TokenCache::new(issuer, DEFAULT_TOKEN_TTL).unwrap();

        let first = cache.get_token("agent_1").await.unwrap();
        let second = cache.get_token("agent_1").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_default_ttl_applies_when_issuer_is_silent() {
        let clock = ManualClock::new();
        let cache = TokenCache::new(CountingIssuer::default(), Duration::from_secs(60))
            .unwrap()
            .with_clock(Arc::new(clock.clone()));

        cache.get_token("agent_1").await.unwrap();
        let record = cache.cached("agent_1").unwrap();
        assert_eq!(record.expires_at, Some(clock.now() + Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn test_issuer_ttl_wins_over_default() {
        let clock = ManualClock::new();
        let issuer = CountingIssuer {
            ttl: Some(Duration::from_secs(5)),
            ..CountingIssuer::default()
        };
        let cache = TokenCache::new(issuer, Duration::from_secs(60))
            .unwrap()
            .with_clock(Arc::new(clock.clone()));

        let first = cache.get_token("agent_1").await.unwrap();
        clock.advance(Duration::from_secs(5));
        let second = cache.get_token("agent_1").await.unwrap();

        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_invalidate_and_purge() {
        let clock = ManualClock::new();
        let issuer = CountingIssuer {
            ttl: Some(Duration::from_secs(1)),
            ..CountingIssuer::default()
        };
        let cache = TokenCache::new(issuer, DEFAULT_TOKEN_TTL)
            .unwrap()
            .with_clock(Arc::new(clock.clone()));

        cache.get_token("a").await.unwrap();
        cache.get_token("b").await.unwrap();
        assert_eq!(cache.len(), 2);

        assert!(cache.invalidate("a").is_some());
        assert_eq!(cache.len(), 1);

        clock.advance(Duration::from_secs(2));
        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_default_ttl_rejected() {
        let result = TokenCache::new(CountingIssuer::default(), Duration::ZERO);
        assert!(matches!(result, Err(GateError::Config(_))));
    }

    #[test]
    fn test_oversized_default_ttl_rejected() {
        let too_long = MAX_TOKEN_TTL + Duration::from_secs(1);
        let result = TokenCache::new(CountingIssuer::default(), too_long);
        assert!(matches!(result, Err(GateError::Config(_))));
        assert!(TokenCache::new(CountingIssuer::default(), MAX_TOKEN_TTL).is_ok());
    }

    #[tokio::test]
    async fn test_issuer_ttl_capped_at_maximum() {
        let clock = ManualClock::new();
        let issuer = CountingIssuer {
            ttl: Some(Duration::MAX),
            ..CountingIssuer::default()
        };
        let cache = TokenCache::new(issuer, DEFAULT_TOKEN_TTL)
            .unwrap()
            .with_clock(Arc::new(clock.clone()));

        cache.get_token("agent_1").await.unwrap();
        let record = cache.cached("agent_1").unwrap();
        assert_eq!(record.expires_at, Some(clock.now() + MAX_TOKEN_TTL));
    }
}

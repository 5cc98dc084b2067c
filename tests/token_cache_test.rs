//! Integration tests for the token cache.
//!
//! Covers:
//! 1. One issuance for 100 concurrent callers of the same identity
//! 2. Re-issuance after expiry (zero TTL and advanced clock)
//! 3. Failure propagation without negative caching
//! 4. Refreshes for different identities do not block each other
//! 5. Very long lifetimes are capped instead of overflowing

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use callgate::builders::build_token_cache;
use callgate::config::GatewayConfig;
use callgate::core::{
    AppResult, CredentialIssuer, GateError, IssuedCredential, TokenCache, DEFAULT_TOKEN_TTL,
    MAX_TOKEN_TTL,
};
use callgate::util::clock::{Clock, ManualClock};
use tokio::sync::Notify;

/// Issuer that counts calls and returns distinct credentials.
#[derive(Clone)]
struct SequenceIssuer {
    calls: Arc<AtomicUsize>,
    delay: Duration,
    ttl: Option<Duration>,
    fail: Arc<AtomicBool>,
}

impl SequenceIssuer {
    fn new(delay: Duration, ttl: Option<Duration>) -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            delay,
            ttl,
            fail: Arc::new(AtomicBool::new(false)),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialIssuer for SequenceIssuer {
    async fn issue(&self, identity: &str) -> AppResult<IssuedCredential> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.delay).await;
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("auth service unavailable");
        }
        Ok(IssuedCredential {
            credential: format!("token-{identity}-{n}"),
            ttl: self.ttl,
        })
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_share_one_issuance() {
    let issuer = SequenceIssuer::new(Duration::from_millis(50), None);
    let cache = Arc::new(TokenCache::new(issuer.clone(), DEFAULT_TOKEN_TTL).unwrap());

    let mut handles = Vec::with_capacity(100);
    for _ in 0..100 {
        let cache = Arc::clone(&cache);
        handles.push(tokio::spawn(async move { cache.get_token("agent_1").await }));
    }

    let results = futures::future::join_all(handles).await;
    let tokens: Vec<String> = results
        .into_iter()
        .map(|joined| joined.expect("task").expect("token"))
        .collect();

    assert_eq!(issuer.calls(), 1);
    assert_eq!(tokens.len(), 100);
    assert!(tokens.iter().all(|t| t == &tokens[0]));
}

#[tokio::test]
async fn test_zero_ttl_forces_reissue() {
    let issuer = SequenceIssuer::new(Duration::ZERO, Some(Duration::ZERO));
    let cache = TokenCache::new(issuer.clone(), DEFAULT_TOKEN_TTL).unwrap();

    let first = cache.get_token("agent_1").await.unwrap();
    let second = cache.get_token("agent_1").await.unwrap();

    assert_ne!(first, second);
    assert_eq!(issuer.calls(), 2);
}

#[tokio::test]
async fn test_expiry_with_injected_clock() {
    let clock = ManualClock::new();
    let issuer = SequenceIssuer::new(Duration::ZERO, Some(Duration::from_secs(30)));
    let cache = TokenCache::new(issuer.clone(), DEFAULT_TOKEN_TTL)
        .unwrap()
        .with_clock(Arc::new(clock.clone()));

    let first = cache.get_token("agent_1").await.unwrap();
    clock.advance(Duration::from_secs(29));
    assert_eq!(cache.get_token("agent_1").await.unwrap(), first);
    assert_eq!(issuer.calls(), 1);

    clock.advance(Duration::from_secs(1));
    let refreshed = cache.get_token("agent_1").await.unwrap();
    assert_ne!(refreshed, first);
    assert_eq!(issuer.calls(), 2);

    assert_eq!(cache.get_token("agent_1").await.unwrap(), refreshed);
    assert_eq!(issuer.calls(), 2);
}

#[tokio::test]
async fn test_failure_is_not_cached() {
    let issuer = SequenceIssuer::new(Duration::ZERO, None);
    issuer.fail.store(true, Ordering::SeqCst);
    let cache = TokenCache::new(issuer.clone(), DEFAULT_TOKEN_TTL).unwrap();

    let err = cache.get_token("X").await.unwrap_err();
    match err {
        GateError::Issuance { identity, reason } => {
            assert_eq!(identity, "X");
            assert!(reason.contains("auth service unavailable"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(cache.cached("X").is_none());

    issuer.fail.store(false, Ordering::SeqCst);
    let token = cache.get_token("X").await.unwrap();
    assert_eq!(token, "token-X-2");
    assert_eq!(cache.cached("X").unwrap().credential, token);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failure_reaches_every_joined_caller() {
    let issuer = SequenceIssuer::new(Duration::from_millis(50), None);
    issuer.fail.store(true, Ordering::SeqCst);
    let cache = Arc::new(TokenCache::new(issuer.clone(), DEFAULT_TOKEN_TTL).unwrap());

    let mut handles = Vec::new();
    for _ in 0..20 {
        let cache = Arc::clone(&cache);
        handles.push(tokio::spawn(async move { cache.get_token("X").await }));
    }

    for joined in futures::future::join_all(handles).await {
        let result = joined.expect("task");
        assert!(matches!(result, Err(GateError::Issuance { .. })));
    }
    assert_eq!(issuer.calls(), 1);
    assert!(cache.is_empty());
}

/// Issuer that parks `slow` until released and answers everyone else at once.
struct GatedIssuer {
    release_slow: Arc<Notify>,
}

#[async_trait]
impl CredentialIssuer for GatedIssuer {
    async fn issue(&self, identity: &str) -> AppResult<IssuedCredential> {
        if identity == "slow" {
            self.release_slow.notified().await;
        }
        Ok(IssuedCredential::with_default_ttl(format!("token-{identity}")))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_identities_refresh_independently() {
    let release_slow = Arc::new(Notify::new());
    let cache = Arc::new(
        TokenCache::new(
            GatedIssuer {
                release_slow: Arc::clone(&release_slow),
            },
            DEFAULT_TOKEN_TTL,
        )
        .unwrap(),
    );

    let slow = {
        let cache = Arc::clone(&cache);
        tokio::spawn(async move { cache.get_token("slow").await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let fast = tokio::time::timeout(Duration::from_secs(1), cache.get_token("fast"))
        .await
        .expect("fast identity must not wait on slow refresh")
        .unwrap();
    assert_eq!(fast, "token-fast");
    assert!(!slow.is_finished());

    release_slow.notify_one();
    assert_eq!(slow.await.unwrap().unwrap(), "token-slow");
}

#[tokio::test]
async fn test_closure_issuer() {
    let cache = TokenCache::new(
        |identity: String| async move {
            Ok::<_, anyhow::Error>(IssuedCredential::new(
                format!("new_token_for_{identity}"),
                Duration::from_secs(3600),
            ))
        },
        DEFAULT_TOKEN_TTL,
    )
    .unwrap();

    assert_eq!(
        cache.get_token("user_123").await.unwrap(),
        "new_token_for_user_123"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unbounded_issuer_ttl_is_capped() {
    let clock = ManualClock::new();
    let cache = Arc::new(
        TokenCache::new(
            |identity: String| async move {
                Ok::<_, anyhow::Error>(IssuedCredential::new(identity, Duration::MAX))
            },
            DEFAULT_TOKEN_TTL,
        )
        .unwrap()
        .with_clock(Arc::new(clock.clone())),
    );

    let token = {
        let cache = Arc::clone(&cache);
        tokio::spawn(async move { cache.get_token("agent_1").await })
            .await
            .expect("issuance must not panic")
            .unwrap()
    };
    assert_eq!(token, "agent_1");

    let record = cache.cached("agent_1").unwrap();
    assert_eq!(record.expires_at, Some(clock.now() + MAX_TOKEN_TTL));

    clock.advance(MAX_TOKEN_TTL - Duration::from_secs(1));
    assert_eq!(cache.get_token("agent_1").await.unwrap(), "agent_1");
    assert_eq!(cache.purge_expired(), 0);
}

#[test]
fn test_out_of_range_config_ttl_rejected() {
    let cfg = GatewayConfig::default().with_default_token_ttl_secs(u64::MAX);
    assert!(cfg.validate().is_err());

    let result = build_token_cache(&cfg, SequenceIssuer::new(Duration::ZERO, None));
    assert!(matches!(result, Err(GateError::Config(_))));

    let too_long = MAX_TOKEN_TTL + Duration::from_secs(1);
    let result = TokenCache::new(SequenceIssuer::new(Duration::ZERO, None), too_long);
    assert!(matches!(result, Err(GateError::Config(_))));
}

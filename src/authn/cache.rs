//! Token result cache.
//!
//! # Responsibilities
//! - Remember successful token reviews for `success_ttl`
//! - Remember negative results (and optionally errors) for `failure_ttl`
//! - Key entries by a SHA-256 digest of audiences and token, never the raw token
//!
//! # Design Decisions
//! - Expired entries are removed when a lookup finds them; there is no sweeper
//! - Concurrent misses for the same token each call through; no coalescing

use async_trait::async_trait;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::{Audiences, AuthResult, TokenAuthenticator};
use crate::observability::metrics;

#[derive(Clone)]
struct CacheEntry {
    result: AuthResult,
    expires_at: Instant,
}

/// Wraps a token authenticator with a TTL cache.
pub struct CachingTokenAuthenticator {
    inner: Arc<dyn TokenAuthenticator>,
    entries: Arc<DashMap<String, CacheEntry>>,
    success_ttl: Duration,
    failure_ttl: Duration,
    cache_errors: bool,
}

impl CachingTokenAuthenticator {
    /// A zero TTL disables caching for that outcome. With `cache_errors`,
    /// errors are cached under `failure_ttl` like plain rejections.
    pub fn new(
        inner: Arc<dyn TokenAuthenticator>,
        cache_errors: bool,
        success_ttl: Duration,
        failure_ttl: Duration,
    ) -> Self {
        Self {
            inner,
            entries: Arc::new(DashMap::new()),
            success_ttl,
            failure_ttl,
            cache_errors,
        }
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn key(token: &str, audiences: Option<&Audiences>) -> String {
        let mut hasher = Sha256::new();
        if let Some(audiences) = audiences {
            for audience in audiences.as_slice() {
                hasher.update((audience.len() as u64).to_be_bytes());
                hasher.update(audience.as_bytes());
            }
        }
        hasher.update([0xff]);
        hasher.update(token.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn lookup(&self, key: &str) -> Option<AuthResult> {
        let now = Instant::now();
        let hit = self.entries.get(key).map(|entry| {
            if entry.expires_at > now {
                Some(entry.result.clone())
            } else {
                None
            }
        });
        match hit {
            Some(Some(result)) => Some(result),
            Some(None) => {
                self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
                None
            }
            None => None,
        }
    }

    fn ttl_for(&self, result: &AuthResult) -> Duration {
        match result {
            Ok(Some(_)) => self.success_ttl,
            Ok(None) => self.failure_ttl,
            Err(_) if self.cache_errors => self.failure_ttl,
            Err(_) => Duration::ZERO,
        }
    }
}

#[async_trait]
impl TokenAuthenticator for CachingTokenAuthenticator {
    async fn authenticate_token(&self, token: &str, audiences: Option<&Audiences>) -> AuthResult {
        let key = Self::key(token, audiences);
        if let Some(result) = self.lookup(&key) {
            metrics::record_token_cache("hit");
            return result;
        }
        metrics::record_token_cache("miss");

        let result = self.inner.authenticate_token(token, audiences).await;
        let ttl = self.ttl_for(&result);
        if !ttl.is_zero() {
            self.entries.insert(
                key,
                CacheEntry {
                    result: result.clone(),
                    expires_at: Instant::now() + ttl,
                },
            );
        }
        result
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn priority(&self) -> i32 {
        self.inner.priority()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authn::testing::{Outcome, StubAuthenticator};
    use std::sync::atomic::Ordering;

    fn cached(outcome: Outcome, cache_errors: bool) -> (CachingTokenAuthenticator, Arc<std::sync::atomic::AtomicUsize>) {
        let stub = StubAuthenticator::new(0, outcome);
        let calls = stub.calls.clone();
        let cache = CachingTokenAuthenticator::new(
            Arc::new(stub),
            cache_errors,
            Duration::from_secs(10),
            Duration::from_secs(2),
        );
        (cache, calls)
    }

    #[tokio::test(start_paused = true)]
    async fn success_cached_for_success_ttl() {
        let (cache, calls) = cached(Outcome::Success("alice"), true);
        cache.authenticate_token("t", None).await.unwrap();
        cache.authenticate_token("t", None).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(11)).await;
        let resp = cache.authenticate_token("t", None).await.unwrap().unwrap();
        assert_eq!(resp.user.name, "alice");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_uses_its_own_ttl() {
        let (cache, calls) = cached(Outcome::NotAuthenticated, true);
        assert_eq!(cache.authenticate_token("t", None).await, Ok(None));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(cache.authenticate_token("t", None).await, Ok(None));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        cache.authenticate_token("t", None).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn errors_skip_cache_unless_enabled() {
        let (cache, calls) = cached(Outcome::Error("boom"), false);
        assert!(cache.authenticate_token("t", None).await.is_err());
        assert!(cache.authenticate_token("t", None).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let (cache, calls) = cached(Outcome::Error("boom"), true);
        assert!(cache.authenticate_token("t", None).await.is_err());
        assert!(cache.authenticate_token("t", None).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_ttl_disables_caching() {
        let stub = StubAuthenticator::new(0, Outcome::Success("alice"));
        let calls = stub.calls.clone();
        let cache =
            CachingTokenAuthenticator::new(Arc::new(stub), true, Duration::ZERO, Duration::ZERO);
        cache.authenticate_token("t", None).await.unwrap();
        cache.authenticate_token("t", None).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn audiences_are_part_of_the_key() {
        let (cache, calls) = cached(Outcome::Success("alice"), true);
        let a = Audiences::new(["a"]);
        let b = Audiences::new(["b"]);
        cache.authenticate_token("t", Some(&a)).await.unwrap();
        cache.authenticate_token("t", Some(&b)).await.unwrap();
        cache.authenticate_token("t", Some(&a)).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn key_hides_token() {
        let key = CachingTokenAuthenticator::key("super-secret", None);
        assert_eq!(key.len(), 64);
        assert!(!key.contains("super-secret"));
    }
}

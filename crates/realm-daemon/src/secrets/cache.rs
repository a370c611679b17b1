//! A bounded-lifetime cache in front of any secrets manager.
//!
//! Tenant keys rotate rarely but are fetched on every authenticated
//! request, so hits bypass the backend entirely. Entries expire about an
//! hour after insertion; expiry is checked lazily on read rather than by
//! background timers, which keeps the cache free of tasks to manage.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{Secret, SecretsError, SecretsManager};

/// How long a cached secret stays served after insertion.
const CACHE_TTL: Duration = Duration::from_secs(60 * 60);

/// Wraps a [`SecretsManager`] with a per-`(name, version)` cache.
pub struct CachingSecretsManager<M> {
    inner: M,
    ttl: Duration,
    cache: Mutex<HashMap<CacheKey, CacheEntry>>,
}

#[derive(PartialEq, Eq, Hash, Clone)]
struct CacheKey {
    name: String,
    version: u64,
}

struct CacheEntry {
    secret: Secret,
    inserted_at: Instant,
}

impl<M: SecretsManager> CachingSecretsManager<M> {
    /// Wraps `inner` with an empty cache and the standard lifetime.
    pub fn new(inner: M) -> Self {
        Self::with_ttl(inner, CACHE_TTL)
    }

    /// Wraps `inner` with a caller-chosen entry lifetime.
    pub fn with_ttl(inner: M, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn cached(&self, key: &CacheKey) -> Option<Secret> {
        let mut cache = self.cache.lock().expect("secrets cache mutex poisoned");
        match cache.get(key) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => {
                Some(entry.secret.clone())
            }
            Some(_) => {
                cache.remove(key);
                None
            }
            None => None,
        }
    }

    fn insert(&self, key: CacheKey, secret: Secret) {
        let mut cache = self.cache.lock().expect("secrets cache mutex poisoned");
        cache.insert(
            key,
            CacheEntry {
                secret,
                inserted_at: Instant::now(),
            },
        );
    }
}

#[async_trait]
impl<M: SecretsManager> SecretsManager for CachingSecretsManager<M> {
    async fn get_secret(&self, name: &str, version: u64) -> Result<Secret, SecretsError> {
        let key = CacheKey {
            name: name.to_string(),
            version,
        };
        if let Some(secret) = self.cached(&key) {
            return Ok(secret);
        }
        // The lock is never held across this await.
        let secret = self.inner.get_secret(name, version).await?;
        self.insert(key, secret.clone());
        Ok(secret)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Counts fetches so tests can observe hits and misses.
    struct CountingManager {
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl SecretsManager for CountingManager {
        async fn get_secret(&self, name: &str, version: u64) -> Result<Secret, SecretsError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if name == "missing" {
                return Err(SecretsError::NotFound {
                    name: name.to_string(),
                    version,
                });
            }
            Ok(Secret::new(format!("{name}:{version}").into_bytes()))
        }
    }

    fn counting(ttl: Duration) -> CachingSecretsManager<CountingManager> {
        CachingSecretsManager::with_ttl(
            CountingManager {
                fetches: AtomicUsize::new(0),
            },
            ttl,
        )
    }

    #[tokio::test]
    async fn test_second_read_hits_cache() {
        let cache = counting(CACHE_TTL);

        let first = cache.get_secret("tenant-acme", 1).await.unwrap();
        let second = cache.get_secret("tenant-acme", 1).await.unwrap();
        assert_eq!(&*first, &*second);
        assert_eq!(cache.inner.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_versions_cache_independently() {
        let cache = counting(CACHE_TTL);

        cache.get_secret("tenant-acme", 1).await.unwrap();
        cache.get_secret("tenant-acme", 2).await.unwrap();
        assert_eq!(cache.inner.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let cache = counting(CACHE_TTL);

        assert!(cache.get_secret("missing", 1).await.is_err());
        assert!(cache.get_secret("missing", 1).await.is_err());
        assert_eq!(cache.inner.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_expired_entries_refetch() {
        let cache = counting(Duration::ZERO);

        cache.get_secret("tenant-acme", 1).await.unwrap();
        cache.get_secret("tenant-acme", 1).await.unwrap();
        assert_eq!(cache.inner.fetches.load(Ordering::SeqCst), 2);
    }
}

//! In-memory cache implementation.

use async_trait::async_trait;
use geo_core::{CacheKey, ResponseCache, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, instrument, trace};

/// Default time-to-live of a cached response.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Default period of the background sweeper.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(120);

/// Cache entry with an absolute expiry.
#[derive(Debug, Clone)]
struct CacheEntry {
    data: Value,
    expires_at: Instant,
}

impl CacheEntry {
    fn new(data: Value, ttl: Duration) -> Self {
        Self {
            data,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_stale(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Process-local response cache with a fixed time-to-live.
///
/// Expiry is absolute: reading an entry never extends its life. Expired
/// entries are invisible to [`get`](ResponseCache::get) immediately and are
/// physically removed by [`invalidate_stale`](ResponseCache::invalidate_stale),
/// which [`spawn_sweeper`](InMemoryCache::spawn_sweeper) calls periodically.
///
/// Time is read from [`tokio::time::Instant`], so tests can drive expiry with a
/// paused clock.
#[derive(Debug)]
pub struct InMemoryCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    ttl: Duration,
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl InMemoryCache {
    /// Create a new empty cache whose entries live for `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Returns true if nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Starts a background task that removes expired entries every `every`.
    ///
    /// The task holds only a weak reference and stops once the cache is dropped.
    /// Must be called from within a Tokio runtime.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let cache: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else {
                    debug!("Cache dropped, stopping sweeper");
                    break;
                };
                // invalidate_stale never fails for the in-memory cache
                let _ = cache.invalidate_stale().await;
            }
        })
    }
}

#[async_trait]
impl ResponseCache for InMemoryCache {
    #[instrument(skip(self), fields(key = %key))]
    async fn get(&self, key: &CacheKey) -> Result<Option<Value>> {
        let cache = self.entries.read().await;
        match cache.get(key) {
            Some(entry) if !entry.is_stale(Instant::now()) => {
                debug!("Cache hit");
                Ok(Some(entry.data.clone()))
            }
            Some(_) => {
                debug!("Cache entry expired");
                Ok(None)
            }
            None => {
                debug!("Cache miss");
                Ok(None)
            }
        }
    }

    #[instrument(skip(self, value), fields(key = %key))]
    async fn put(&self, key: &CacheKey, value: Value) -> Result<()> {
        let mut cache = self.entries.write().await;
        cache.insert(key.clone(), CacheEntry::new(value, self.ttl));
        debug!(entries = cache.len(), "Cached response");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn invalidate_stale(&self) -> Result<usize> {
        let now = Instant::now();
        let mut cache = self.entries.write().await;
        let before = cache.len();
        cache.retain(|_, entry| !entry.is_stale(now));
        let removed = before - cache.len();

        if removed > 0 {
            debug!("Invalidated {} stale cache entries", removed);
        } else {
            trace!("No stale cache entries");
        }

        Ok(removed)
    }

    #[instrument(skip(self))]
    async fn clear(&self) -> Result<()> {
        self.entries.write().await.clear();
        debug!("Cleared all cache entries");
        Ok(())
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(op: &str, year: i32) -> CacheKey {
        CacheKey::new(op, &json!({ "year": year })).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_hit_then_expiry() {
        let cache = InMemoryCache::new(Duration::from_secs(3600));
        let k = key("graficoAnual", 2021);

        assert!(cache.get(&k).await.unwrap().is_none());
        cache.put(&k, json!({"fechaGrafico": ["01/01"]})).await.unwrap();

        tokio::time::advance(Duration::from_secs(3599)).await;
        assert_eq!(
            cache.get(&k).await.unwrap(),
            Some(json!({"fechaGrafico": ["01/01"]}))
        );

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get(&k).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reads_do_not_extend_life() {
        let cache = InMemoryCache::new(Duration::from_secs(10));
        let k = key("op", 2020);
        cache.put(&k, json!(1)).await.unwrap();

        for _ in 0..9 {
            tokio::time::advance(Duration::from_secs(1)).await;
            assert!(cache.get(&k).await.unwrap().is_some());
        }
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cache.get(&k).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_refreshes_expiry() {
        let cache = InMemoryCache::new(Duration::from_secs(10));
        let k = key("op", 2020);
        cache.put(&k, json!(1)).await.unwrap();

        tokio::time::advance(Duration::from_secs(8)).await;
        cache.put(&k, json!(2)).await.unwrap();

        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(cache.get(&k).await.unwrap(), Some(json!(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_stale_removes_only_expired() {
        let cache = InMemoryCache::new(Duration::from_secs(10));
        cache.put(&key("a", 2020), json!(1)).await.unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;
        cache.put(&key("b", 2020), json!(2)).await.unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;

        assert_eq!(cache.invalidate_stale().await.unwrap(), 1);
        assert_eq!(cache.len().await, 1);
        assert!(cache.get(&key("b", 2020)).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_purges_in_background() {
        let cache = Arc::new(InMemoryCache::new(Duration::from_secs(30)));
        let handle = cache.spawn_sweeper(Duration::from_secs(120));

        cache.put(&key("a", 2020), json!(1)).await.unwrap();
        assert_eq!(cache.len().await, 1);

        tokio::time::sleep(Duration::from_secs(121)).await;
        assert!(cache.is_empty().await);

        drop(cache);
        tokio::time::sleep(Duration::from_secs(121)).await;
        assert!(handle.is_finished());
    }

    #[tokio::test]
    async fn test_clear() {
        let cache = InMemoryCache::default();
        assert_eq!(cache.ttl(), DEFAULT_TTL);

        cache.put(&key("a", 2020), json!(1)).await.unwrap();
        cache.put(&key("a", 2021), json!(2)).await.unwrap();
        cache.clear().await.unwrap();

        assert!(cache.is_empty().await);
        assert!(cache.get(&key("a", 2020)).await.unwrap().is_none());
    }
}

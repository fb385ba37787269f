//! No-op cache implementation.

use async_trait::async_trait;
use geo_core::{CacheKey, ResponseCache, Result};
use serde_json::Value;
use std::time::Duration;
use tracing::trace;

/// A no-op cache that doesn't store anything.
///
/// `get` always returns `Ok(None)` and `put` always returns `Ok(())`.
/// Used when caching is disabled in the configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCache;

impl NoopCache {
    /// Create a new no-op cache.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ResponseCache for NoopCache {
    async fn get(&self, _key: &CacheKey) -> Result<Option<Value>> {
        trace!("NoopCache: get called, returning None");
        Ok(None)
    }

    async fn put(&self, _key: &CacheKey, _value: Value) -> Result<()> {
        trace!("NoopCache: put called, doing nothing");
        Ok(())
    }

    async fn invalidate_stale(&self) -> Result<usize> {
        trace!("NoopCache: invalidate_stale called, returning 0");
        Ok(0)
    }

    async fn clear(&self) -> Result<()> {
        trace!("NoopCache: clear called, doing nothing");
        Ok(())
    }

    fn ttl(&self) -> Duration {
        Duration::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_noop_cache_never_hits() {
        let cache = NoopCache::new();
        let key = CacheKey::new("nieve", &json!({"cuenca": "barrancasygrande"})).unwrap();

        assert!(cache.put(&key, json!({"a": 1})).await.is_ok());
        assert!(cache.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_noop_cache_management() {
        let cache = NoopCache::new();
        assert_eq!(cache.invalidate_stale().await.unwrap(), 0);
        assert!(cache.clear().await.is_ok());
        assert_eq!(cache.ttl(), Duration::ZERO);
    }
}

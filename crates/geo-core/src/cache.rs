//! Cache trait for storing computed responses.
//!
//! This module defines the [`ResponseCache`] trait and the [`CacheKey`] it is
//! indexed by. Keys are derived from an operation name plus a canonical JSON
//! rendering of the validated request parameters, so two requests that mean the
//! same thing always land on the same entry.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::time::Duration;

use crate::error::{AnalysisError, Result};

/// Deterministic cache key: `operation:canonical-json-parameters`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Builds a key from an operation name and its parameters.
    ///
    /// Parameters are first converted to a [`serde_json::Value`], whose object
    /// maps are ordered by key, so field order never affects the key. Numbers are
    /// rendered with serde_json's shortest round-trip formatting.
    pub fn new(operation: &str, params: &impl Serialize) -> Result<Self> {
        let value = serde_json::to_value(params)
            .map_err(|e| AnalysisError::Cache(format!("unserializable cache key: {e}")))?;
        Ok(Self(format!("{operation}:{}", canonical_json(&value))))
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let body = entries
                .into_iter()
                .map(|(k, v)| format!("{}:{}", Value::from(k.as_str()), canonical_json(v)))
                .collect::<Vec<_>>()
                .join(",");
            format!("{{{body}}}")
        }
        Value::Array(items) => {
            let body = items
                .iter()
                .map(canonical_json)
                .collect::<Vec<_>>()
                .join(",");
            format!("[{body}]")
        }
        scalar => scalar.to_string(),
    }
}

/// Trait for caching computed responses.
///
/// Entries expire a fixed time-to-live after insertion, independent of how
/// often they are read. Failed computations are never stored.
#[async_trait]
pub trait ResponseCache: Send + Sync + fmt::Debug {
    /// Retrieves a cached response.
    ///
    /// Returns `Ok(Some(value))` on a live hit, `Ok(None)` on a miss or an
    /// expired entry.
    async fn get(&self, key: &CacheKey) -> Result<Option<Value>>;

    /// Stores a response with a fresh expiry.
    async fn put(&self, key: &CacheKey, value: Value) -> Result<()>;

    /// Removes expired entries.
    ///
    /// Returns the number of entries removed.
    async fn invalidate_stale(&self) -> Result<usize>;

    /// Clears all cached responses.
    async fn clear(&self) -> Result<()>;

    /// The time-to-live applied to new entries.
    fn ttl(&self) -> Duration;
}

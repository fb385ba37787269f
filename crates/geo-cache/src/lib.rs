#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Caching implementations for computed analysis responses.
//!
//! This crate provides implementations of the [`ResponseCache`] trait from `geo-core`:
//!
//! - [`InMemoryCache`] - Process-local cache with TTL expiry and a periodic sweeper
//! - [`NoopCache`] - No-op cache that doesn't store anything

/// In-memory cache implementation.
pub mod memory;
/// No-op cache implementation.
pub mod noop;

// Re-export the trait for convenience
pub use geo_core::ResponseCache;

// Re-export implementations
pub use memory::{DEFAULT_SWEEP_INTERVAL, DEFAULT_TTL, InMemoryCache};
pub use noop::NoopCache;

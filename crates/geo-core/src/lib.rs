#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Core traits and types for remote geospatial analyses.
//!
//! This crate provides the foundational abstractions shared by the gateway and
//! its Earth Engine client:
//!
//! - [`AnalysisClient`](client::AnalysisClient) - Remote evaluation of expression graphs
//! - [`Expr`](expr::Expr) - Expression graph nodes and typed builders
//! - [`ResponseCache`](cache::ResponseCache) - Caching abstraction
//! - [`FanOut`](fanout::FanOut) - Bounded concurrent fan-out

/// Cache trait and key derivation for computed responses.
pub mod cache;
/// Client trait for the remote analysis service.
pub mod client;
/// Error types for analysis operations.
pub mod error;
/// Expression graph builders.
pub mod expr;
/// Bounded concurrent fan-out.
pub mod fanout;
/// Validated request types (LatLng, Year, Period, etc.).
pub mod types;

// Re-export commonly used items at crate root
pub use cache::{CacheKey, ResponseCache};
pub use client::{AnalysisClient, AnalysisClientExt};
pub use error::{AnalysisError, Result};
pub use expr::{
    Computed, Dictionary, EeDate, Expr, FeatureCollection, Filter, Geometry, Image,
    ImageCollection, Reducer, RegionReduction, Visualization,
};
pub use fanout::{BatchResult, DEFAULT_CONCURRENCY, FanOut};
pub use types::{
    AdminRegion, Basin, LatLng, Name, Period, ReferenceDate, Ring, TileUrl, Year, parse_date,
};

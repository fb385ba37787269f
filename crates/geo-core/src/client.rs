//! Client trait for the remote analysis service.
//!
//! This module defines [`AnalysisClient`], the uniform request/response surface
//! every procedure talks to. Implementations translate an [`Expr`] graph into the
//! remote service's wire format and wait for the evaluated result.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt::Debug;

use crate::{
    error::{AnalysisError, Result},
    expr::{Computed, Expr, Image},
    types::TileUrl,
};

/// A remote analysis service.
///
/// All methods are suspension points: the caller awaits one network round trip
/// per call. Implementations must be safe to call concurrently.
#[async_trait]
pub trait AnalysisClient: Send + Sync + Debug {
    /// Returns the name of this client (e.g., "Earth Engine").
    fn name(&self) -> &str;

    /// Performs the authentication handshake.
    ///
    /// Callers are expected to run this once per process through a
    /// single-flight guard, not before every request.
    async fn authenticate(&self) -> Result<()>;

    /// Evaluates an expression and returns its value as JSON.
    async fn compute(&self, expr: &Expr) -> Result<Value>;

    /// Registers a visualized image as a map layer and returns its tile URL template.
    async fn map_tiles(&self, image: &Image) -> Result<TileUrl>;
}

/// Typed helpers on top of [`AnalysisClient::compute`].
#[async_trait]
pub trait AnalysisClientExt: AnalysisClient {
    /// Evaluates a value and deserializes it.
    async fn fetch<T: DeserializeOwned + Send>(&self, value: &Computed) -> Result<T> {
        let json = self.compute(value.expr()).await?;
        serde_json::from_value(json).map_err(|e| AnalysisError::Parse(e.to_string()))
    }

    /// Evaluates a numeric value. `null` (no data) maps to `None`.
    async fn fetch_number(&self, value: &Computed) -> Result<Option<f64>> {
        match self.compute(value.expr()).await? {
            Value::Null => Ok(None),
            Value::Number(n) => Ok(n.as_f64()),
            other => Err(AnalysisError::Parse(format!("expected a number, got {other}"))),
        }
    }
}

impl<C: AnalysisClient + ?Sized> AnalysisClientExt for C {}

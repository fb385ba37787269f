#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! HTTP gateway serving Earth Engine analyses.
//!
//! A [`Dispatcher`] validates each request into an [`Operation`], answers
//! from a [`ResponseCache`] when it can, authenticates the
//! [`AnalysisClient`] once per process and otherwise runs the matching
//! analysis procedure. [`server::router`] exposes it over axum.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use geo_gateway::{AppState, Dispatcher, router};
//! use geo_cache::InMemoryCache;
//! use geo_earthengine::{EarthEngineClient, EarthEngineConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = EarthEngineClient::new(EarthEngineConfig::new("geosepa"))?;
//!     let dispatcher = Dispatcher::new(Arc::new(client), Arc::new(InMemoryCache::default()));
//!     let app = router(AppState::new(Arc::new(dispatcher)), &[]);
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

/// Project asset locations.
pub mod assets;
/// Single-flight client authentication.
pub mod auth;
/// Reference date calendars.
pub mod calendar;
/// Command-line arguments.
pub mod cli;
/// TOML configuration.
pub mod config;
/// Request dispatch.
pub mod dispatcher;
/// Gateway errors.
pub mod error;
/// Contact form relay.
pub mod mail;
/// Routes and their parameters.
pub mod request;
/// HTTP server.
pub mod server;

mod procedures;

#[cfg(test)]
mod testing;

pub use assets::AssetCatalog;
pub use auth::{AuthSession, AuthState};
pub use cli::Args;
pub use config::GatewayConfig;
pub use dispatcher::Dispatcher;
pub use error::{GatewayError, Result};
pub use mail::{ContactForm, Mailer, MailjetMailer};
pub use request::{Endpoint, Operation};
pub use server::{AppState, router};

pub use geo_core::{AnalysisClient, ResponseCache};

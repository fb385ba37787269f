#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Google Earth Engine REST client.
//!
//! This crate provides [`EarthEngineClient`], which implements the
//! [`AnalysisClient`] trait from `geo-core` on top of the Earth Engine REST API.
//!
//! # Features
//!
//! - Evaluate expression graphs with `value:compute`
//! - Register visualized images with `maps` and build tile URL templates
//! - Static or endpoint-issued access tokens, refreshed before expiry
//! - Status mapping: 401/403 drop the token, 429 reports a rate limit
//!
//! # Example
//!
//! ```no_run
//! use geo_core::{AnalysisClient, AnalysisClientExt, Image};
//! use geo_earthengine::{EarthEngineClient, EarthEngineConfig};
//!
//! # async fn example() -> geo_core::Result<()> {
//! let config = EarthEngineConfig::new("my-project").with_static_token("ya29...");
//! let client = EarthEngineClient::new(config)?;
//! client.authenticate().await?;
//!
//! let bands = client
//!     .fetch::<Vec<String>>(&Image::load("MODIS/061/MOD13Q1/2024_01_01").band_names())
//!     .await?;
//! println!("{bands:?}");
//! # Ok(())
//! # }
//! ```

mod encode;

use std::fmt;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use geo_core::{AnalysisClient, AnalysisError, Expr, Image, Result, TileUrl};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

/// Earth Engine REST API base URL.
pub const DEFAULT_BASE_URL: &str = "https://earthengine.googleapis.com";

/// GCE metadata server token endpoint for the default service account.
pub const DEFAULT_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Default HTTP timeout. Reductions over large regions are slow.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Tokens are refreshed this long before they expire.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

const SERVICE_NAME: &str = "Earth Engine";

/// Where access tokens come from.
#[derive(Clone)]
pub enum TokenSource {
    /// A fixed bearer token.
    Static(String),
    /// A token endpoint speaking the GCE metadata server protocol.
    Endpoint(String),
}

impl fmt::Debug for TokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(_) => f.debug_tuple("Static").field(&"[REDACTED]").finish(),
            Self::Endpoint(url) => f.debug_tuple("Endpoint").field(url).finish(),
        }
    }
}

/// Connection settings for [`EarthEngineClient`].
#[derive(Clone, Debug)]
pub struct EarthEngineConfig {
    /// API base URL, without a trailing slash.
    pub base_url: String,
    /// Cloud project billed for the requests.
    pub project: String,
    /// Access token source.
    pub token_source: TokenSource,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl EarthEngineConfig {
    /// Settings for `project` with the public API and the metadata server.
    #[must_use]
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            project: project.into(),
            token_source: TokenSource::Endpoint(DEFAULT_TOKEN_URL.to_string()),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Overrides the API base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Uses a fixed bearer token.
    #[must_use]
    pub fn with_static_token(mut self, token: impl Into<String>) -> Self {
        self.token_source = TokenSource::Static(token.into());
        self
    }

    /// Fetches tokens from `url`.
    #[must_use]
    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_source = TokenSource::Endpoint(url.into());
        self
    }

    /// Overrides the request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Clone)]
struct AccessToken {
    value: String,
    expires_at: Option<Instant>,
}

impl AccessToken {
    fn is_fresh(&self) -> bool {
        self.expires_at
            .is_none_or(|at| Instant::now() + TOKEN_REFRESH_MARGIN < at)
    }
}

/// Earth Engine REST client.
///
/// Implements [`AnalysisClient`]. Safe to share across tasks.
pub struct EarthEngineClient {
    http: reqwest::Client,
    config: EarthEngineConfig,
    token: RwLock<Option<AccessToken>>,
}

impl fmt::Debug for EarthEngineClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EarthEngineClient")
            .field("base_url", &self.config.base_url)
            .field("project", &self.config.project)
            .field("token_source", &self.config.token_source)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

impl EarthEngineClient {
    /// Create a new client. No request is made until the first call.
    pub fn new(config: EarthEngineConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AnalysisError::Network(format!("failed to create HTTP client: {e}")))?;
        Ok(Self::with_client(http, config))
    }

    /// Create a new client with a custom HTTP client.
    #[must_use]
    pub fn with_client(http: reqwest::Client, config: EarthEngineConfig) -> Self {
        Self {
            http,
            config,
            token: RwLock::new(None),
        }
    }

    /// Build a project-scoped endpoint URL.
    fn project_url(&self, method: &str) -> String {
        format!(
            "{}/v1/projects/{}/{}",
            self.config.base_url, self.config.project, method
        )
    }

    /// Build the tile URL template for a registered map.
    fn tile_url(&self, map_name: &str) -> TileUrl {
        TileUrl::new(format!(
            "{}/v1/{}/tiles/{{z}}/{{x}}/{{y}}",
            self.config.base_url, map_name
        ))
    }

    async fn fetch_token(&self) -> Result<AccessToken> {
        let url = match &self.config.token_source {
            TokenSource::Static(value) => {
                return Ok(AccessToken {
                    value: value.clone(),
                    expires_at: None,
                });
            }
            TokenSource::Endpoint(url) => url,
        };

        debug!("Fetching access token from {}", url);
        let response = self
            .http
            .get(url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| AnalysisError::AuthenticationFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnalysisError::AuthenticationFailed(format!(
                "token endpoint returned {status}: {}",
                error_message(&body).unwrap_or_else(|| "no details".to_string())
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| AnalysisError::AuthenticationFailed(format!("bad token response: {e}")))?;

        Ok(AccessToken {
            value: token.access_token,
            expires_at: token
                .expires_in
                .map(|secs| Instant::now() + Duration::from_secs(secs)),
        })
    }

    /// Returns a fresh bearer token, fetching one if needed.
    async fn bearer(&self) -> Result<String> {
        if let Some(token) = self.token.read().await.as_ref().filter(|t| t.is_fresh()) {
            return Ok(token.value.clone());
        }

        let mut slot = self.token.write().await;
        if let Some(token) = slot.as_ref().filter(|t| t.is_fresh()) {
            return Ok(token.value.clone());
        }
        let token = self.fetch_token().await?;
        let value = token.value.clone();
        *slot = Some(token);
        debug!("Access token refreshed");
        Ok(value)
    }

    /// POST a JSON body and deserialize the JSON reply.
    async fn post<T: DeserializeOwned>(&self, url: &str, body: &Value) -> Result<T> {
        let bearer = self.bearer().await?;

        debug!("POST {}", url);
        let response = self
            .http
            .post(url)
            .bearer_auth(bearer)
            .json(body)
            .send()
            .await
            .map_err(|e| AnalysisError::Network(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            *self.token.write().await = None;
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "Earth Engine rejected the access token");
            return Err(AnalysisError::AuthenticationFailed(
                error_message(&body).unwrap_or_else(|| "access denied".to_string()),
            ));
        }

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(AnalysisError::RateLimited {
                service: SERVICE_NAME.to_string(),
                retry_after,
            });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnalysisError::Upstream(
                error_message(&body).unwrap_or_else(|| format!("HTTP {status}")),
            ));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| AnalysisError::Parse(e.to_string()))
    }
}

/// Extracts `error.message` from a Google API error body.
fn error_message(body: &str) -> Option<String> {
    serde_json::from_str::<ApiErrorResponse>(body)
        .ok()
        .map(|r| r.error.message)
}

#[async_trait]
impl AnalysisClient for EarthEngineClient {
    fn name(&self) -> &str {
        SERVICE_NAME
    }

    #[instrument(skip(self))]
    async fn authenticate(&self) -> Result<()> {
        let token = self.fetch_token().await?;
        *self.token.write().await = Some(token);
        info!(project = %self.config.project, "Authenticated with Earth Engine");
        Ok(())
    }

    #[instrument(skip(self, expr), fields(function = ?expr.function_name()))]
    async fn compute(&self, expr: &Expr) -> Result<Value> {
        let body = json!({ "expression": encode::encode(expr) });
        let response: ComputeResponse = self.post(&self.project_url("value:compute"), &body).await?;
        Ok(response.result)
    }

    #[instrument(skip(self, image))]
    async fn map_tiles(&self, image: &Image) -> Result<TileUrl> {
        let body = json!({
            "expression": encode::encode(image.expr()),
            "fileFormat": "AUTO_JPEG_PNG",
        });
        let response: MapResponse = self.post(&self.project_url("maps"), &body).await?;
        Ok(self.tile_url(&response.name))
    }
}

// Earth Engine REST API response types

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ComputeResponse {
    #[serde(default)]
    result: Value,
}

#[derive(Debug, Deserialize)]
struct MapResponse {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

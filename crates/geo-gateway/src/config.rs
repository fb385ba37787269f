//! Configuration file handling.
//!
//! The gateway reads an optional TOML file; every section and field has a
//! default, and explicit command-line values override the file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::cli::Args;

/// Full gateway configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// HTTP listener settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Response cache settings.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Remote query fan-out settings.
    #[serde(default)]
    pub fanout: FanOutConfig,

    /// Earth Engine connection settings.
    #[serde(default)]
    pub earth_engine: EarthEngineSection,

    /// Contact form relay settings.
    #[serde(default)]
    pub mail: MailConfig,
}

/// `[server]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Origins allowed by CORS.
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            allowed_origins: default_allowed_origins(),
        }
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_allowed_origins() -> Vec<String> {
    vec!["http://localhost", "http://localhost:5173"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// `[cache]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Whether responses are cached at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Lifetime of a cached response.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// Interval between sweeps of expired entries.
    #[serde(default = "default_sweep_secs")]
    pub sweep_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: default_ttl_secs(),
            sweep_secs: default_sweep_secs(),
        }
    }
}

impl CacheConfig {
    /// [`Self::ttl_secs`] as a duration.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// [`Self::sweep_secs`] as a duration, at least one second.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_secs.max(1))
    }
}

fn default_true() -> bool {
    true
}

fn default_ttl_secs() -> u64 {
    3600
}

fn default_sweep_secs() -> u64 {
    120
}

/// `[fanout]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanOutConfig {
    /// Maximum in-flight remote queries per request.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for FanOutConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

fn default_concurrency() -> usize {
    6
}

/// `[earth_engine]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EarthEngineSection {
    /// REST API root.
    #[serde(default = "default_ee_base_url")]
    pub base_url: String,

    /// Cloud project the computations are billed to.
    #[serde(default = "default_project")]
    pub project: String,

    /// Root of the project's table and image assets.
    #[serde(default = "default_asset_root")]
    pub asset_root: String,

    /// Endpoint issuing OAuth access tokens.
    #[serde(default = "default_token_url")]
    pub token_url: String,

    /// Per-request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EarthEngineSection {
    fn default() -> Self {
        Self {
            base_url: default_ee_base_url(),
            project: default_project(),
            asset_root: default_asset_root(),
            token_url: default_token_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_ee_base_url() -> String {
    geo_earthengine::DEFAULT_BASE_URL.to_string()
}

fn default_project() -> String {
    "geosepa".to_string()
}

fn default_asset_root() -> String {
    crate::assets::DEFAULT_ASSET_ROOT.to_string()
}

fn default_token_url() -> String {
    geo_earthengine::DEFAULT_TOKEN_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

/// `[mail]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    /// Mailjet API root.
    #[serde(default = "default_mail_base_url")]
    pub base_url: String,

    /// Verified sender address.
    #[serde(default)]
    pub sender: String,

    /// Address receiving the contact forms.
    #[serde(default)]
    pub recipient: String,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            base_url: default_mail_base_url(),
            sender: String::new(),
            recipient: String::new(),
        }
    }
}

fn default_mail_base_url() -> String {
    crate::mail::DEFAULT_MAILJET_URL.to_string()
}

impl GatewayConfig {
    /// Reads and parses a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Applies command-line overrides.
    pub fn merge_with_args(&mut self, args: &Args) {
        if let Some(ref bind) = args.bind {
            self.server.bind_addr = bind.clone();
        }
        if let Some(concurrency) = args.concurrency {
            self.fanout.concurrency = concurrency;
        }
        if let Some(ttl) = args.cache_ttl {
            self.cache.ttl_secs = ttl;
        }
    }

    /// The default configuration rendered as TOML.
    #[must_use]
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

//! Command-line arguments of the `geo-gateway` binary.

use clap::Parser;
use std::path::PathBuf;

/// geo-gateway - HTTP gateway for Earth Engine analyses
///
/// Serves snow cover, NDVI, flood and soil water analyses over JSON routes,
/// caching responses and bounding concurrent remote queries.
///
/// Examples:
///   geo-gateway --config gateway.toml
///   geo-gateway --bind 127.0.0.1:8080 --concurrency 4 -v
#[derive(Parser, Debug, Clone, Default)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, value_name = "FILE", env = "GEO_GATEWAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address to listen on, overrides `server.bind_addr`
    #[arg(short, long, value_name = "ADDR")]
    pub bind: Option<String>,

    /// Maximum concurrent remote queries per request
    #[arg(long, value_name = "N")]
    pub concurrency: Option<usize>,

    /// Response cache TTL in seconds, overrides `cache.ttl_secs`
    #[arg(long, value_name = "SECS")]
    pub cache_ttl: Option<u64>,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

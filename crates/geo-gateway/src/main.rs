//! `geo-gateway` binary.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use geo_cache::{InMemoryCache, NoopCache};
use geo_core::{FanOut, ResponseCache};
use geo_earthengine::{EarthEngineClient, EarthEngineConfig};
use geo_gateway::{
    AppState, Args, AssetCatalog, Dispatcher, GatewayConfig, Mailer, MailjetMailer, router,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

fn earth_engine(config: &GatewayConfig) -> Result<EarthEngineClient> {
    let section = &config.earth_engine;
    let mut ee = EarthEngineConfig::new(&section.project)
        .with_base_url(&section.base_url)
        .with_token_url(&section.token_url)
        .with_timeout(Duration::from_secs(section.timeout_secs));
    if let Ok(token) = std::env::var("EE_ACCESS_TOKEN") {
        ee = ee.with_static_token(token);
    }
    EarthEngineClient::new(ee).context("Failed to build Earth Engine client")
}

fn mailer(config: &GatewayConfig) -> Option<Arc<dyn Mailer>> {
    let (Ok(key), Ok(secret)) = (
        std::env::var("MAILJET_API_KEY"),
        std::env::var("MAILJET_API_SECRET"),
    ) else {
        warn!("MAILJET_API_KEY/MAILJET_API_SECRET not set, /contact disabled");
        return None;
    };
    let mail = &config.mail;
    if mail.sender.is_empty() || mail.recipient.is_empty() {
        warn!("mail.sender/mail.recipient not configured, /contact disabled");
        return None;
    }
    Some(Arc::new(
        MailjetMailer::new(key, secret, &mail.sender, &mail.recipient)
            .with_base_url(&mail.base_url),
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_tracing(args.verbose);

    let mut config = match &args.config {
        Some(path) => GatewayConfig::load(path)?,
        None => GatewayConfig::default(),
    };
    config.merge_with_args(&args);

    let client = Arc::new(earth_engine(&config)?);
    let cache: Arc<dyn ResponseCache> = if config.cache.enabled {
        let cache = Arc::new(InMemoryCache::new(config.cache.ttl()));
        let _sweeper = cache.spawn_sweeper(config.cache.sweep_interval());
        cache
    } else {
        Arc::new(NoopCache::new())
    };

    let dispatcher = Dispatcher::new(client, cache)
        .with_assets(AssetCatalog::new(&config.earth_engine.asset_root))
        .with_fanout(FanOut::new(config.fanout.concurrency));
    let mut state = AppState::new(Arc::new(dispatcher));
    if let Some(mailer) = mailer(&config) {
        state = state.with_mailer(mailer);
    }
    let app = router(state, &config.server.allowed_origins);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;
    info!(
        addr = %config.server.bind_addr,
        project = %config.earth_engine.project,
        concurrency = config.fanout.concurrency,
        cache_ttl_secs = config.cache.ttl_secs,
        "geo-gateway listening"
    );
    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}

// src/bin/fundwatch_daemon.rs
use clap::Parser;
use fundwatch::{
    cache::RankingCache,
    collector::Collector,
    config::{ms, MonitorConfig},
    pipeline::FundingPipeline,
    providers::build_adapters,
    ranking::RankingBuilder,
    server,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Serve the cross-exchange funding spread ranking over HTTP.
#[derive(Debug, Parser)]
struct Args {
    /// TOML config; defaults apply when omitted
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = MonitorConfig::load(args.config.as_deref())?;

    let adapters = build_adapters(&cfg.sources)?;
    let collector = Collector::new(adapters, ms(cfg.sources.source_timeout_ms));
    tracing::info!(sources = ?collector.sources(), "registered funding sources");

    let pipeline = FundingPipeline::new(collector, RankingBuilder::from_config(&cfg.ranking));
    let cache = Arc::new(RankingCache::new(pipeline, &cfg.cache));
    let refresher = cache.spawn_refresher(Duration::from_secs(cfg.server.warm_interval_secs));

    let app = server::router(Arc::clone(&cache), cfg.server.static_dir.as_deref());
    let addr: SocketAddr = format!("{}:{}", cfg.server.host, cfg.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("fundwatch listening on http://{addr}");

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    if let Some(handle) = refresher {
        handle.abort();
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for Ctrl+C: {err}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, stopping");
}

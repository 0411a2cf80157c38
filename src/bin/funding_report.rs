// src/bin/funding_report.rs
use clap::Parser;
use fundwatch::{
    collector::Collector,
    config::{ms, MonitorConfig},
    pipeline::{FundingPipeline, Pipeline},
    providers::build_adapters,
    ranking::RankingBuilder,
    report::render_table,
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Collect funding rates once and print the widest cross-exchange spreads.
#[derive(Debug, Parser)]
struct Args {
    #[arg(long)]
    config: Option<PathBuf>,
    /// Rows to print
    #[arg(long, default_value_t = 20)]
    top: usize,
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

    let collector = Collector::new(build_adapters(&cfg.sources)?, ms(cfg.sources.source_timeout_ms));
    let pipeline = FundingPipeline::new(collector, RankingBuilder::from_config(&cfg.ranking));

    tracing::info!("Collecting funding data...");
    let out = pipeline.run().await?;
    print!("{}", render_table(&out.rows, args.top));
    Ok(())
}

//! 52-week range refresher
//!
//! Usage: cargo run --bin refresh_ranges [-- --check]
//!
//! Fetches one year of prices per configured asset and rewrites the range cache.
//! With `--check` it only reports each configured asset's age, exiting 1 when the
//! cache, any entry, or any configured asset is stale or missing.

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cryptoalert::config::{self, AppConfig};
use cryptoalert::market::CoinGeckoClient;
use cryptoalert::ranges::{EntryStatus, RangeCache, RangeRefresher, RefreshSettings};

#[derive(Parser, Debug)]
#[command(name = "refresh_ranges")]
#[command(about = "Refresh the 52-week high/low cache", long_about = None)]
struct Args {
    /// Extra configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Asset list document (overrides files.coins_config)
    #[arg(long)]
    coins: Option<PathBuf>,

    /// Range cache document (overrides files.range_cache)
    #[arg(long)]
    output: Option<PathBuf>,

    /// Only report staleness, no fetching
    #[arg(long, default_value_t = false)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    let app_config = AppConfig::load(args.config.as_deref())?;
    let coins_path = args
        .coins
        .unwrap_or_else(|| PathBuf::from(&app_config.files.coins_config));
    let cache_path = args
        .output
        .unwrap_or_else(|| PathBuf::from(&app_config.files.range_cache));
    let today = Local::now().date_naive();
    let max_age = app_config.ranges.max_age_days;

    let coins = config::load_coins_config(&coins_path)?;
    let ids = coins.ids();

    if args.check {
        let cache = RangeCache::load(&cache_path)
            .with_context(|| format!("Failed to read range cache {}", cache_path.display()))?;
        let check = cache.check(&ids, today, max_age);
        for (id, status) in &check.entries {
            match status {
                EntryStatus::Fresh { age_days } => info!(asset = %id, age_days, "fresh"),
                EntryStatus::Stale { age_days } => {
                    warn!(asset = %id, age_days, max_age_days = max_age, "stale")
                }
                EntryStatus::Missing => warn!(asset = %id, "missing"),
            }
        }
        if check.cache_stale {
            warn!(
                path = %cache_path.display(),
                last_updated = ?cache.last_updated,
                max_age_days = max_age,
                "⚠️ Range cache is stale"
            );
        }
        if !check.is_healthy() {
            warn!(
                problems = check.problems().count(),
                "⚠️ Range cache needs a refresh"
            );
            std::process::exit(1);
        }
        info!(
            path = %cache_path.display(),
            last_updated = ?cache.last_updated,
            entries = ids.len(),
            "✅ Range cache is fresh"
        );
        return Ok(());
    }

    info!("🔄 Refreshing 52w ranges for {} assets", ids.len());

    let gateway = CoinGeckoClient::from_config(&app_config.gateway, &app_config.ranges)
        .context("Failed to create market data client")?;
    let refresher = RangeRefresher::new(
        Arc::new(gateway),
        RefreshSettings::from(&app_config.ranges),
    );

    let report = refresher.refresh_file(&cache_path, &ids, today).await?;

    info!(
        updated = report.updated.len(),
        failed = report.failed.len(),
        "📊 Range refresh finished"
    );
    for (id, e) in &report.failed {
        warn!(asset = %id, error = %e, "Range not refreshed");
    }
    if report.updated.is_empty() && !ids.is_empty() {
        std::process::exit(1);
    }
    Ok(())
}

//! CryptoAlert - alert cycle runner
//!
//! Runs one polling cycle (or a `--watch` loop of them): fetch quotes, evaluate
//! drawdown and target conditions, deliver one webhook message, save dedup state.

use anyhow::{Context, Result};
use chrono::{Local, Utc};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use cryptoalert::config::{self, validation, AppConfig};
use cryptoalert::cycle::{AlertCycle, CycleReport, CycleSettings, DeliveryOutcome};
use cryptoalert::market::CoinGeckoClient;
use cryptoalert::notify::WebhookNotifier;

/// Crypto price alert bot
#[derive(Parser, Debug)]
#[command(name = "cryptoalert")]
#[command(about = "ATH-drawdown and price-target alerts delivered to a webhook", long_about = None)]
struct Args {
    /// Extra configuration file layered over config/default and config/local
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Asset list document (overrides files.coins_config)
    #[arg(long)]
    coins: Option<PathBuf>,

    /// Alert-behavior document (overrides files.alert_config)
    #[arg(long)]
    alerts: Option<PathBuf>,

    /// Evaluate and print alerts without delivering them or saving state
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Check the configuration documents and exit
    #[arg(long, default_value_t = false)]
    validate: bool,

    /// Keep running, one cycle every check_interval_minutes
    #[arg(long, default_value_t = false)]
    watch: bool,

    /// Log level when RUST_LOG is not set: trace, debug, info, warn, error
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Emit JSON log lines
    #[arg(long, default_value_t = false)]
    log_json: bool,
}

fn init_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

fn run_validation(coins: &Path, alerts: &Path) -> bool {
    let report = validation::validate_files(coins, alerts);
    for issue in &report.issues {
        println!("{}", issue);
    }
    let errors = report.errors().count();
    let warnings = report.warnings().count();
    if report.has_errors() {
        println!("❌ Validation failed: {} error(s), {} warning(s)", errors, warnings);
        false
    } else {
        println!("✅ Configuration valid ({} warning(s))", warnings);
        true
    }
}

fn log_report(report: &CycleReport) {
    info!(
        alerts = report.alerts.len(),
        deferred = report.deferred.len(),
        missing_quotes = report.missing_quotes.len(),
        ath_failures = report.ath_failures.len(),
        stale_ranges = report.stale_ranges.len(),
        delivery = ?report.delivery,
        state_saved = report.state_saved,
        "Cycle finished"
    );
}

async fn run_cycle(cycle: &AlertCycle) -> Result<CycleReport> {
    let report = cycle.run_once(Local::now().date_naive(), Utc::now()).await?;
    log_report(&report);
    Ok(report)
}

async fn watch(cycle: &AlertCycle, interval: Duration) {
    info!(interval_secs = interval.as_secs(), "👀 Watching, Ctrl-C to stop");
    loop {
        tokio::select! {
            result = run_cycle(cycle) => {
                if let Err(e) = result {
                    error!(error = %format!("{:#}", e), "Cycle failed, retrying next interval");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("🛑 Interrupted during cycle, state left as last saved");
                return;
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("🛑 Shutting down");
                return;
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level, args.log_json);

    let mut app_config = AppConfig::load(args.config.as_deref())?;
    if let Some(path) = &args.coins {
        app_config.files.coins_config = path.display().to_string();
    }
    if let Some(path) = &args.alerts {
        app_config.files.alert_config = path.display().to_string();
    }

    let coins_path = PathBuf::from(&app_config.files.coins_config);
    let alerts_path = PathBuf::from(&app_config.files.alert_config);

    if args.validate {
        if !run_validation(&coins_path, &alerts_path) {
            std::process::exit(1);
        }
        return Ok(());
    }

    info!("🚀 Starting CryptoAlert v{}", env!("CARGO_PKG_VERSION"));
    info!("⚙️  Config: {}", app_config);

    let coins = config::load_coins_config(&coins_path)?;
    let behavior = config::load_alert_behavior(&alerts_path)?;
    info!(
        assets = coins.coins.len(),
        reset_daily = behavior.reset_alerts_daily,
        max_alerts_per_run = behavior.max_alerts_per_run,
        tracking_file = %behavior.alert_tracking_file,
        "📋 Configuration loaded"
    );

    let notifier = WebhookNotifier::from_config(&app_config.notify)?;
    if !args.dry_run && !notifier.is_configured() {
        anyhow::bail!(
            "No webhook URL configured. Set DISCORD_WEBHOOK_URL (or CRYPTOALERT__NOTIFY__WEBHOOK_URL), or use --dry-run"
        );
    }
    if args.dry_run {
        warn!("🧪 Dry run: nothing is delivered and no state is saved");
    }

    let gateway = CoinGeckoClient::from_config(&app_config.gateway, &app_config.ranges)
        .context("Failed to create market data client")?;
    let interval = Duration::from_secs(behavior.check_interval_minutes.max(1) * 60);
    let settings = CycleSettings::from_config(&app_config, behavior, args.dry_run);
    let cycle = AlertCycle::new(Arc::new(gateway), Arc::new(notifier), coins.coins, settings);

    if args.watch {
        watch(&cycle, interval).await;
        return Ok(());
    }

    let report = run_cycle(&cycle).await?;
    if !report.is_success() {
        if let DeliveryOutcome::Failed(e) = &report.delivery {
            error!(error = %e, "Alerts were not delivered");
        }
        if let Some(e) = &report.persist_error {
            error!(
                path = %e.path().display(),
                error = %e,
                remediation = e.remediation(),
                "Dedup state was not saved"
            );
        }
        std::process::exit(1);
    }
    Ok(())
}

//! Configuration management for CryptoAlert
//!
//! Runtime settings come from built-in defaults, optional `config/default` and
//! `config/local` files, and `CRYPTOALERT__*` environment variables (after `.env`).
//! The asset list and alert-behavior documents are separate JSON/YAML files.

mod types;
pub mod validation;

pub use types::*;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::persistence;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub files: FilesConfig,
    pub gateway: GatewayConfig,
    pub ranges: RangesConfig,
    pub notify: NotifyConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FilesConfig {
    /// Asset list document
    pub coins_config: String,
    /// Alert-behavior document
    pub alert_config: String,
    /// 52-week range cache document
    pub range_cache: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Market API base URL (CoinGecko v3 compatible)
    pub base_url: String,
    /// Quote currency for prices and ATH lookups
    pub vs_currency: String,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
    /// Fixed delay between consecutive ATH lookups in milliseconds
    pub ath_call_delay_ms: u64,
    /// Attempts per ATH call when rate limited
    pub rate_limit_max_attempts: u32,
    /// Linear backoff step for rate-limited ATH calls in seconds
    pub rate_limit_backoff_secs: u64,
    /// Attempts for the bulk quote call on transient failures
    pub transient_max_attempts: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RangesConfig {
    /// Days of history reduced to high/low
    pub series_days: u32,
    /// Age after which cache entries are stale
    pub max_age_days: i64,
    /// Fixed delay between consecutive series fetches in milliseconds
    pub call_delay_ms: u64,
    /// Linear backoff step for rate-limited series calls in seconds
    pub rate_limit_backoff_secs: u64,
    /// Attempts per series call when rate limited
    pub rate_limit_max_attempts: u32,
    /// Cooldown before retrying the failed subset in seconds
    pub retry_cooldown_secs: u64,
    /// Follow-up passes over the failed subset
    pub retry_passes: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
    /// Discord-compatible webhook URL (falls back to DISCORD_WEBHOOK_URL)
    pub webhook_url: Option<String>,
    /// Name shown in the message footer
    pub bot_name: String,
    /// Request timeout in seconds
    pub request_timeout_secs: u64,
}

impl GatewayConfig {
    pub fn ath_call_delay(&self) -> Duration {
        Duration::from_millis(self.ath_call_delay_ms)
    }
}

impl AppConfig {
    /// Load configuration from defaults, config files and environment
    pub fn load(extra_file: Option<&Path>) -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let mut builder = Config::builder()
            // Files
            .set_default("files.coins_config", "coins_config.json")?
            .set_default("files.alert_config", "alert_config.json")?
            .set_default("files.range_cache", "52w_stats.json")?
            // Gateway defaults
            .set_default("gateway.base_url", "https://api.coingecko.com/api/v3")?
            .set_default("gateway.vs_currency", "usd")?
            .set_default("gateway.request_timeout_secs", 30)?
            .set_default("gateway.ath_call_delay_ms", 1500)?
            .set_default("gateway.rate_limit_max_attempts", 3)?
            .set_default("gateway.rate_limit_backoff_secs", 5)?
            .set_default("gateway.transient_max_attempts", 3)?
            // Range cache defaults
            .set_default("ranges.series_days", 365)?
            .set_default("ranges.max_age_days", 7)?
            .set_default("ranges.call_delay_ms", 3000)?
            .set_default("ranges.rate_limit_backoff_secs", 10)?
            .set_default("ranges.rate_limit_max_attempts", 3)?
            .set_default("ranges.retry_cooldown_secs", 60)?
            .set_default("ranges.retry_passes", 1)?
            // Notification defaults
            .set_default("notify.bot_name", "Crypto Alert Bot")?
            .set_default("notify.request_timeout_secs", 15)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false));

        if let Some(path) = extra_file {
            builder = builder.add_source(File::from(path).required(true));
        }

        let config = builder
            // Override with environment variables (CRYPTOALERT__SECTION__KEY)
            .add_source(Environment::with_prefix("CRYPTOALERT").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let mut app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        if app_config
            .notify
            .webhook_url
            .as_deref()
            .map_or(true, |url| url.trim().is_empty())
        {
            app_config.notify.webhook_url = std::env::var("DISCORD_WEBHOOK_URL")
                .ok()
                .filter(|url| !url.trim().is_empty());
        }

        Ok(app_config)
    }

    /// Generate a digest of the config (without secrets) for logging
    pub fn digest(&self) -> String {
        format!(
            "coins={} alerts={} ranges={} api={} vs={} webhook={}",
            self.files.coins_config,
            self.files.alert_config,
            self.files.range_cache,
            self.gateway.base_url,
            self.gateway.vs_currency,
            if self.notify.webhook_url.is_some() {
                "set"
            } else {
                "unset"
            }
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}

/// Load the asset list. A missing or malformed file is fatal.
pub fn load_coins_config(path: &Path) -> Result<CoinsConfig> {
    let mut coins: CoinsConfig = persistence::load_document(path)
        .with_context(|| format!("Failed to load coins config {}", path.display()))?
        .with_context(|| format!("Coins config file {} not found", path.display()))?;
    coins.normalize();
    Ok(coins)
}

/// Load the alert-behavior document, falling back to defaults when absent
pub fn load_alert_behavior(path: &Path) -> Result<AlertBehavior> {
    let loaded: Option<AlertBehavior> = persistence::load_document(path)
        .with_context(|| format!("Failed to load alert config {}", path.display()))?;
    match loaded {
        Some(mut behavior) => {
            if behavior.max_alerts_per_run == 0 {
                warn!(
                    path = %path.display(),
                    "max_alerts_per_run is 0, using 1 so alerts are not deferred forever"
                );
                behavior.max_alerts_per_run = 1;
            }
            Ok(behavior)
        }
        None => {
            info!(
                path = %path.display(),
                "Alert config not found, using defaults"
            );
            Ok(AlertBehavior::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    fn temp_data_dir(test_name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "cryptoalert_config_{}_{}",
            test_name,
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }

    #[test]
    fn coins_config_loads_and_normalizes() {
        let dir = temp_data_dir("coins");
        let path = dir.join("coins_config.json");
        fs::write(
            &path,
            r#"{"coins": [{"id": "bitcoin", "name": "Bitcoin", "symbol": "BTC",
                "ath_thresholds": [40, 30], "price_alerts": [80000, 70000, 70000]}]}"#,
        )
        .unwrap();

        let coins = load_coins_config(&path).unwrap();
        assert_eq!(coins.coins.len(), 1);
        assert_eq!(coins.coins[0].drawdown_thresholds, vec![30.0, 40.0]);
        assert_eq!(coins.coins[0].price_targets, vec![70000.0, 80000.0]);
    }

    #[test]
    fn missing_coins_config_is_fatal() {
        let dir = temp_data_dir("coins_missing");
        let err = load_coins_config(&dir.join("coins_config.json")).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn coins_config_accepts_yaml() {
        let dir = temp_data_dir("coins_yaml");
        let path = dir.join("coins.yaml");
        fs::write(
            &path,
            "coins:\n  - id: ethereum\n    name: Ethereum\n    symbol: ETH\n    ath_thresholds: [40, 50]\n",
        )
        .unwrap();

        let coins = load_coins_config(&path).unwrap();
        assert_eq!(coins.ids(), vec!["ethereum".to_string()]);
    }

    #[test]
    fn missing_alert_config_uses_defaults() {
        let dir = temp_data_dir("behavior_missing");
        let behavior = load_alert_behavior(&dir.join("alert_config.json")).unwrap();
        assert_eq!(behavior, AlertBehavior::default());
    }

    #[test]
    fn zero_alert_cap_is_raised_to_one() {
        let dir = temp_data_dir("behavior_zero_cap");
        let path = dir.join("alert_config.json");
        fs::write(
            &path,
            r#"{"reset_alerts_daily": true, "check_interval_minutes": 5, "max_alerts_per_run": 0}"#,
        )
        .unwrap();

        let behavior = load_alert_behavior(&path).unwrap();
        assert_eq!(behavior.max_alerts_per_run, 1);
        assert_eq!(behavior.check_interval_minutes, 5);
    }

    #[test]
    fn invalid_alert_config_is_an_error() {
        let dir = temp_data_dir("behavior_invalid");
        let path = dir.join("alert_config.json");
        fs::write(&path, "invalid json").unwrap();
        assert!(load_alert_behavior(&path).is_err());
    }
}

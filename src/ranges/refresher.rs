//! Range cache refresher job
//!
//! Fetches a one-year series per asset, sequentially and paced, reduces it to
//! high/low and merges the results into the cache. Failed assets get bounded
//! follow-up passes after a cooldown.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::{RangeCache, RangeStats};
use crate::config::RangesConfig;
use crate::market::{GatewayError, MarketDataGateway};

#[derive(Debug, Clone)]
pub struct RefreshSettings {
    pub series_days: u32,
    /// Fixed delay between consecutive series calls
    pub call_delay: Duration,
    /// Wait before retrying the failed subset
    pub retry_cooldown: Duration,
    /// Follow-up passes over the failed subset
    pub retry_passes: u32,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            series_days: 365,
            call_delay: Duration::from_secs(3),
            retry_cooldown: Duration::from_secs(60),
            retry_passes: 1,
        }
    }
}

impl From<&RangesConfig> for RefreshSettings {
    fn from(cfg: &RangesConfig) -> Self {
        Self {
            series_days: cfg.series_days,
            call_delay: Duration::from_millis(cfg.call_delay_ms),
            retry_cooldown: Duration::from_secs(cfg.retry_cooldown_secs),
            retry_passes: cfg.retry_passes,
        }
    }
}

/// Outcome of one refresh run
#[derive(Debug, Default)]
pub struct RefreshReport {
    pub updated: Vec<String>,
    /// Assets still failing after every pass, with the last error
    pub failed: Vec<(String, GatewayError)>,
}

impl RefreshReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct RangeRefresher {
    gateway: Arc<dyn MarketDataGateway>,
    settings: RefreshSettings,
}

impl RangeRefresher {
    pub fn new(gateway: Arc<dyn MarketDataGateway>, settings: RefreshSettings) -> Self {
        Self { gateway, settings }
    }

    /// Refresh `ids` into `cache`. Entries of assets that keep failing are left as they were.
    pub async fn refresh(&self, cache: &mut RangeCache, ids: &[String], today: NaiveDate) -> RefreshReport {
        let mut report = RefreshReport::default();

        let mut pending = self.run_pass(cache, ids, today, &mut report.updated).await;

        for pass in 1..=self.settings.retry_passes {
            if pending.is_empty() {
                break;
            }
            info!(
                pass = pass,
                failed = pending.len(),
                cooldown_secs = self.settings.retry_cooldown.as_secs(),
                "Retrying failed assets after cooldown"
            );
            if !self.settings.retry_cooldown.is_zero() {
                tokio::time::sleep(self.settings.retry_cooldown).await;
            }
            let retry_ids: Vec<String> = pending.iter().map(|(id, _)| id.clone()).collect();
            pending = self.run_pass(cache, &retry_ids, today, &mut report.updated).await;
        }

        if !report.updated.is_empty() {
            cache.last_updated = Some(today);
        }
        report.failed = pending;
        report
    }

    async fn run_pass(
        &self,
        cache: &mut RangeCache,
        ids: &[String],
        today: NaiveDate,
        updated: &mut Vec<String>,
    ) -> Vec<(String, GatewayError)> {
        let mut failed = Vec::new();
        let total = ids.len();

        for (idx, id) in ids.iter().enumerate() {
            info!(asset = %id, progress = %format!("{}/{}", idx + 1, total), "Updating 52w range");

            match self
                .gateway
                .fetch_price_series(id, self.settings.series_days)
                .await
                .and_then(|prices| {
                    RangeStats::from_series(&prices, today).ok_or(GatewayError::EmptySeries)
                }) {
                Ok(stats) => {
                    info!(
                        asset = %id,
                        high_52w = stats.high_52w,
                        low_52w = stats.low_52w,
                        "52w range updated"
                    );
                    cache.upsert(id, stats);
                    if !updated.contains(id) {
                        updated.push(id.clone());
                    }
                }
                Err(e) => {
                    warn!(asset = %id, call = "market_chart", error = %e, "Failed to fetch 52w range, skipping");
                    failed.push((id.clone(), e));
                }
            }

            // No pause after the last request
            if idx + 1 < total && !self.settings.call_delay.is_zero() {
                tokio::time::sleep(self.settings.call_delay).await;
            }
        }

        failed
    }

    /// Load the cache file, refresh it and save it when anything succeeded
    pub async fn refresh_file(&self, path: &Path, ids: &[String], today: NaiveDate) -> Result<RefreshReport> {
        let mut cache = match RangeCache::load(path) {
            Ok(cache) => cache,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Existing range cache unreadable, starting fresh");
                RangeCache::default()
            }
        };

        let report = self.refresh(&mut cache, ids, today).await;

        if report.updated.is_empty() {
            warn!(path = %path.display(), "No ranges were fetched, cache file left untouched");
            return Ok(report);
        }

        cache.save(path).with_context(|| {
            format!("Failed to save range cache {}", path.display())
        })?;
        info!(
            path = %path.display(),
            updated = report.updated.len(),
            failed = report.failed.len(),
            "Range cache saved"
        );
        Ok(report)
    }
}

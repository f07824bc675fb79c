//! Alert cycle driver
//!
//! Runs one polling cycle end to end, strictly in sequence:
//! dedup state → bulk quotes → paced ATH lookups → range cache → evaluate →
//! cap → deliver → persist.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::{AlertBehavior, AppConfig, AssetConfig};
use crate::engine::{self, DedupState, PrefetchedAth};
use crate::market::{GatewayError, MarketDataGateway, MarketSnapshot};
use crate::notify::{format_message, NotificationSink, NotifyError};
use crate::persistence::StoreError;
use crate::ranges::RangeCache;
use crate::types::Alert;

#[derive(Debug, Clone)]
pub struct CycleSettings {
    pub behavior: AlertBehavior,
    /// Dedup state document
    pub state_path: PathBuf,
    pub range_cache_path: PathBuf,
    pub range_max_age_days: i64,
    /// Fixed pause between consecutive ATH lookups
    pub ath_call_delay: Duration,
    pub bot_name: String,
    /// Evaluate and log only: no delivery, no persistence
    pub dry_run: bool,
}

impl CycleSettings {
    pub fn from_config(config: &AppConfig, behavior: AlertBehavior, dry_run: bool) -> Self {
        Self {
            state_path: PathBuf::from(&behavior.alert_tracking_file),
            behavior,
            range_cache_path: PathBuf::from(&config.files.range_cache),
            range_max_age_days: config.ranges.max_age_days,
            ath_call_delay: config.gateway.ath_call_delay(),
            bot_name: config.notify.bot_name.clone(),
            dry_run,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    NoAlerts,
    DryRun,
    Delivered,
    Failed(NotifyError),
}

/// What one cycle did
#[derive(Debug)]
pub struct CycleReport {
    pub alerts: Vec<Alert>,
    /// Alerts past the per-run cap, left armed for the next cycle
    pub deferred: Vec<Alert>,
    pub missing_quotes: Vec<String>,
    pub ath_failures: Vec<(String, GatewayError)>,
    /// Range entries ignored because they are too old
    pub stale_ranges: Vec<String>,
    pub delivery: DeliveryOutcome,
    pub state_saved: bool,
    pub persist_error: Option<StoreError>,
}

impl CycleReport {
    fn empty() -> Self {
        Self {
            alerts: Vec::new(),
            deferred: Vec::new(),
            missing_quotes: Vec::new(),
            ath_failures: Vec::new(),
            stale_ranges: Vec::new(),
            delivery: DeliveryOutcome::NoAlerts,
            state_saved: false,
            persist_error: None,
        }
    }

    /// Delivery and persistence both went through (or were not needed)
    pub fn is_success(&self) -> bool {
        !matches!(self.delivery, DeliveryOutcome::Failed(_)) && self.persist_error.is_none()
    }
}

pub struct AlertCycle {
    gateway: Arc<dyn MarketDataGateway>,
    sink: Arc<dyn NotificationSink>,
    assets: Vec<AssetConfig>,
    settings: CycleSettings,
}

impl AlertCycle {
    pub fn new(
        gateway: Arc<dyn MarketDataGateway>,
        sink: Arc<dyn NotificationSink>,
        assets: Vec<AssetConfig>,
        settings: CycleSettings,
    ) -> Self {
        Self {
            gateway,
            sink,
            assets,
            settings,
        }
    }

    pub fn settings(&self) -> &CycleSettings {
        &self.settings
    }

    /// Sequential ATH lookups for assets that can still fire a drawdown alert
    async fn prefetch_ath(
        &self,
        snapshot: &MarketSnapshot,
        state: &DedupState,
    ) -> PrefetchedAth {
        let wanted: Vec<&AssetConfig> = self
            .assets
            .iter()
            .filter(|a| snapshot.contains(&a.id) && engine::needs_ath_lookup(a, state))
            .collect();

        let mut results = PrefetchedAth::new();
        let total = wanted.len();
        for (idx, asset) in wanted.into_iter().enumerate() {
            let result = self.gateway.fetch_ath(&asset.id).await;
            results.insert(&asset.id, result);

            if idx + 1 < total && !self.settings.ath_call_delay.is_zero() {
                tokio::time::sleep(self.settings.ath_call_delay).await;
            }
        }
        results
    }

    fn load_ranges(&self, today: NaiveDate) -> (RangeCache, Vec<String>) {
        let path = &self.settings.range_cache_path;
        let cache = match RangeCache::load(path) {
            Ok(cache) => cache,
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    remediation = e.remediation(),
                    "Range cache unreadable, alerts go out without 52w context"
                );
                RangeCache::default()
            }
        };
        let (fresh, stale) = cache.partition_fresh(today, self.settings.range_max_age_days);
        if !stale.is_empty() {
            warn!(
                stale = stale.len(),
                max_age_days = self.settings.range_max_age_days,
                "Stale 52w ranges ignored, run refresh_ranges"
            );
        }
        (fresh, stale)
    }

    /// Run one cycle. Only a failed bulk quote call is an error; every other
    /// failure is recorded in the report.
    pub async fn run_once(&self, today: NaiveDate, now: DateTime<Utc>) -> Result<CycleReport> {
        let mut report = CycleReport::empty();
        let behavior = &self.settings.behavior;

        let prior = DedupState::load(&self.settings.state_path, today, behavior.reset_alerts_daily);

        let ids: Vec<String> = self.assets.iter().map(|a| a.id.clone()).collect();
        let snapshot = self
            .gateway
            .fetch_snapshot(&ids)
            .await
            .with_context(|| format!("Bulk quote fetch from {} failed", self.gateway.name()))?;
        info!(
            requested = ids.len(),
            received = snapshot.len(),
            "📊 Market snapshot fetched"
        );

        let ath = self.prefetch_ath(&snapshot, &prior).await;
        let (ranges, stale) = self.load_ranges(today);
        report.stale_ranges = stale;

        let mut evaluation = engine::evaluate(&self.assets, &snapshot, &ranges, &prior, &ath);
        report.deferred = evaluation.defer_beyond(behavior.max_alerts_per_run);
        if !report.deferred.is_empty() {
            warn!(
                deferred = report.deferred.len(),
                max_alerts_per_run = behavior.max_alerts_per_run,
                "Alert cap reached, remaining alerts deferred to the next cycle"
            );
        }
        report.missing_quotes = std::mem::take(&mut evaluation.missing_quotes);
        report.ath_failures = std::mem::take(&mut evaluation.ath_failures);
        report.alerts = evaluation.alerts.clone();

        if report.alerts.is_empty() {
            info!(assets = self.assets.len(), "✅ No new alerts this cycle");
            return Ok(report);
        }

        let message = format_message(&report.alerts, now, &self.settings.bot_name);

        if self.settings.dry_run {
            info!(
                title = %message.title,
                color = message.color,
                "🧪 Dry run, not delivering:\n{}\n{}",
                message.description,
                message.footer
            );
            report.delivery = DeliveryOutcome::DryRun;
            return Ok(report);
        }

        if let Err(e) = self.sink.deliver(&message).await {
            error!(
                sink = self.sink.name(),
                error = %e,
                alerts = report.alerts.len(),
                "Notification delivery failed, alert state not saved so they retry next cycle"
            );
            report.delivery = DeliveryOutcome::Failed(e);
            return Ok(report);
        }
        report.delivery = DeliveryOutcome::Delivered;
        info!(alerts = report.alerts.len(), "🚨 Alerts sent");

        if evaluation.changed() {
            match evaluation.state.save(&self.settings.state_path) {
                Ok(()) => report.state_saved = true,
                Err(e) => {
                    error!(
                        path = %e.path().display(),
                        error = %e,
                        remediation = e.remediation(),
                        "Failed to save alert state, sent alerts may repeat"
                    );
                    report.persist_error = Some(e);
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::{AssetQuote, MockMarketDataGateway};
    use crate::notify::{MockNotificationSink, WebhookMessage};
    use chrono::TimeZone;
    use std::fs;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap()
    }

    fn temp_data_dir(test_name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "cryptoalert_cycle_{}_{}",
            test_name,
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }

    fn settings(dir: &PathBuf, dry_run: bool) -> CycleSettings {
        CycleSettings {
            behavior: AlertBehavior::default(),
            state_path: dir.join("sent_alerts.json"),
            range_cache_path: dir.join("52w_stats.json"),
            range_max_age_days: 7,
            ath_call_delay: Duration::ZERO,
            bot_name: "Crypto Alert Bot".to_string(),
            dry_run,
        }
    }

    fn assets() -> Vec<AssetConfig> {
        vec![
            AssetConfig::new("bitcoin", "Bitcoin", "BTC").with_thresholds(&[30.0, 40.0, 50.0]),
            AssetConfig::new("ethereum", "Ethereum", "ETH").with_targets(&[2500.0]),
        ]
    }

    fn gateway_at(btc: f64, eth: f64) -> MockMarketDataGateway {
        let mut gateway = MockMarketDataGateway::new();
        gateway.expect_name().return_const("mock");
        gateway.expect_fetch_snapshot().returning(move |_| {
            Ok(MarketSnapshot::new(now())
                .with_quote(AssetQuote::new("bitcoin", btc))
                .with_quote(AssetQuote::new("ethereum", eth)))
        });
        gateway
            .expect_fetch_ath()
            .withf(|id| id == "bitcoin")
            .returning(|_| Ok(69000.0));
        gateway
    }

    fn sink_expecting(times: usize) -> MockNotificationSink {
        let mut sink = MockNotificationSink::new();
        sink.expect_name().return_const("mock");
        sink.expect_deliver().times(times).returning(|_| Ok(()));
        sink
    }

    #[tokio::test(start_paused = true)]
    async fn ath_lookups_are_paced_without_a_trailing_pause() {
        let dir = temp_data_dir("ath_pacing");
        let mut gateway = MockMarketDataGateway::new();
        gateway.expect_name().return_const("mock");
        gateway.expect_fetch_snapshot().returning(|_| {
            Ok(MarketSnapshot::new(now())
                .with_quote(AssetQuote::new("bitcoin", 30000.0))
                .with_quote(AssetQuote::new("ethereum", 1500.0))
                .with_quote(AssetQuote::new("solana", 80.0))
                .with_quote(AssetQuote::new("tether", 1.0)))
        });
        gateway.expect_fetch_ath().times(3).returning(|id| match id {
            "bitcoin" => Ok(69000.0),
            "ethereum" => Ok(4800.0),
            _ => Ok(260.0),
        });

        let assets = vec![
            AssetConfig::new("bitcoin", "Bitcoin", "BTC").with_thresholds(&[30.0]),
            AssetConfig::new("ethereum", "Ethereum", "ETH").with_thresholds(&[30.0]),
            AssetConfig::new("solana", "Solana", "SOL").with_thresholds(&[30.0]),
            // Targets only, never needs an ATH
            AssetConfig::new("tether", "Tether", "USDT").with_targets(&[0.5]),
        ];
        let mut cycle_settings = settings(&dir, true);
        cycle_settings.ath_call_delay = Duration::from_millis(1500);
        let cycle = AlertCycle::new(
            Arc::new(gateway),
            Arc::new(sink_expecting(0)),
            assets,
            cycle_settings,
        );

        let started = tokio::time::Instant::now();
        let report = cycle.run_once(today(), now()).await.unwrap();

        assert_eq!(started.elapsed(), Duration::from_millis(3000));
        assert_eq!(report.alerts.len(), 3);
        assert!(report.ath_failures.is_empty());
    }

    #[tokio::test]
    async fn live_cycle_delivers_once_and_persists() {
        let dir = temp_data_dir("live");
        let mut sink = MockNotificationSink::new();
        sink.expect_name().return_const("mock");
        sink.expect_deliver()
            .withf(|m: &WebhookMessage| {
                m.title == "🚨 Crypto Alert: 2 alerts"
                    && m.description.contains("ATH Drop Alerts")
                    && m.description.contains("Price Alerts")
            })
            .times(1)
            .returning(|_| Ok(()));

        let cycle = AlertCycle::new(
            Arc::new(gateway_at(48300.0, 2400.0)),
            Arc::new(sink),
            assets(),
            settings(&dir, false),
        );
        let report = cycle.run_once(today(), now()).await.unwrap();

        assert_eq!(report.alerts.len(), 2);
        assert_eq!(report.delivery, DeliveryOutcome::Delivered);
        assert!(report.state_saved);

        let state = DedupState::load(&dir.join("sent_alerts.json"), today(), true);
        assert_eq!(
            state.sent_keys().collect::<Vec<_>>(),
            vec!["bitcoin_ath_30", "ethereum_price_2500"]
        );
    }

    #[tokio::test]
    async fn second_cycle_same_day_is_silent() {
        let dir = temp_data_dir("repeat");
        let cycle = AlertCycle::new(
            Arc::new(gateway_at(48300.0, 2400.0)),
            Arc::new(sink_expecting(1)),
            assets(),
            settings(&dir, false),
        );

        let first = cycle.run_once(today(), now()).await.unwrap();
        let second = cycle.run_once(today(), now()).await.unwrap();

        assert_eq!(first.alerts.len(), 2);
        assert!(second.alerts.is_empty());
        assert_eq!(second.delivery, DeliveryOutcome::NoAlerts);
    }

    #[tokio::test]
    async fn dry_run_neither_delivers_nor_persists() {
        let dir = temp_data_dir("dry_run");
        let cycle = AlertCycle::new(
            Arc::new(gateway_at(48300.0, 2400.0)),
            Arc::new(sink_expecting(0)),
            assets(),
            settings(&dir, true),
        );

        let report = cycle.run_once(today(), now()).await.unwrap();

        assert_eq!(report.alerts.len(), 2);
        assert_eq!(report.delivery, DeliveryOutcome::DryRun);
        assert!(!dir.join("sent_alerts.json").exists());
    }

    #[tokio::test]
    async fn failed_delivery_leaves_state_untouched() {
        let dir = temp_data_dir("delivery_failed");
        let mut sink = MockNotificationSink::new();
        sink.expect_name().return_const("mock");
        sink.expect_deliver().times(1).returning(|_| {
            Err(NotifyError::Http {
                status: 500,
                body: "boom".to_string(),
            })
        });

        let cycle = AlertCycle::new(
            Arc::new(gateway_at(48300.0, 2400.0)),
            Arc::new(sink),
            assets(),
            settings(&dir, false),
        );
        let report = cycle.run_once(today(), now()).await.unwrap();

        assert!(matches!(report.delivery, DeliveryOutcome::Failed(_)));
        assert!(!report.is_success());
        assert!(!dir.join("sent_alerts.json").exists());
    }

    #[tokio::test]
    async fn unwritable_state_after_delivery_is_reported() {
        let dir = temp_data_dir("persist_failed");
        // A regular file where the state directory should be
        let blocker = dir.join("blocker");
        fs::write(&blocker, "not a directory").unwrap();
        let mut cycle_settings = settings(&dir, false);
        cycle_settings.state_path = blocker.join("sent_alerts.json");

        let cycle = AlertCycle::new(
            Arc::new(gateway_at(48300.0, 2400.0)),
            Arc::new(sink_expecting(1)),
            assets(),
            cycle_settings,
        );
        let report = cycle.run_once(today(), now()).await.unwrap();

        assert_eq!(report.delivery, DeliveryOutcome::Delivered);
        assert!(!report.state_saved);
        assert!(report.persist_error.is_some());
        assert!(!report.is_success());
    }

    #[tokio::test]
    async fn failed_snapshot_aborts_the_cycle() {
        let dir = temp_data_dir("snapshot_failed");
        let mut gateway = MockMarketDataGateway::new();
        gateway.expect_name().return_const("mock");
        gateway
            .expect_fetch_snapshot()
            .returning(|_| Err(GatewayError::Timeout));
        gateway.expect_fetch_ath().never();

        let cycle = AlertCycle::new(
            Arc::new(gateway),
            Arc::new(sink_expecting(0)),
            assets(),
            settings(&dir, false),
        );

        assert!(cycle.run_once(today(), now()).await.is_err());
        assert!(!dir.join("sent_alerts.json").exists());
    }

    #[tokio::test]
    async fn alerts_past_the_cap_fire_next_cycle() {
        let dir = temp_data_dir("cap");
        let mut s = settings(&dir, false);
        s.behavior.max_alerts_per_run = 1;

        let cycle = AlertCycle::new(
            Arc::new(gateway_at(48300.0, 2400.0)),
            Arc::new(sink_expecting(2)),
            assets(),
            s,
        );

        let first = cycle.run_once(today(), now()).await.unwrap();
        assert_eq!(first.alerts.len(), 1);
        assert_eq!(first.deferred.len(), 1);

        let second = cycle.run_once(today(), now()).await.unwrap();
        assert_eq!(second.alerts.len(), 1);
        assert_eq!(second.alerts[0].asset_id, "ethereum");
    }

    #[tokio::test]
    async fn ath_is_not_fetched_for_assets_without_open_thresholds() {
        let dir = temp_data_dir("no_ath");
        DedupState::new(today())
            .with_sent(["bitcoin_ath_30", "bitcoin_ath_40", "bitcoin_ath_50"])
            .save(&dir.join("sent_alerts.json"))
            .unwrap();

        let mut gateway = MockMarketDataGateway::new();
        gateway.expect_name().return_const("mock");
        gateway.expect_fetch_snapshot().returning(|_| {
            Ok(MarketSnapshot::new(now()).with_quote(AssetQuote::new("bitcoin", 10000.0)))
        });
        gateway.expect_fetch_ath().never();

        let cycle = AlertCycle::new(
            Arc::new(gateway),
            Arc::new(sink_expecting(0)),
            assets(),
            settings(&dir, false),
        );
        let report = cycle.run_once(today(), now()).await.unwrap();

        assert!(report.alerts.is_empty());
        assert_eq!(report.missing_quotes, vec!["ethereum".to_string()]);
    }

    #[tokio::test]
    async fn stale_ranges_are_dropped_from_context() {
        let dir = temp_data_dir("stale_ranges");
        fs::write(
            dir.join("52w_stats.json"),
            r#"{"last_updated": "2026-01-01", "coins": {
                "ethereum": {"high_52w": 4800, "low_52w": 1500, "updated_at": "2026-01-01"}}}"#,
        )
        .unwrap();

        let cycle = AlertCycle::new(
            Arc::new(gateway_at(60000.0, 2400.0)),
            Arc::new(sink_expecting(1)),
            assets(),
            settings(&dir, false),
        );
        let report = cycle.run_once(today(), now()).await.unwrap();

        assert_eq!(report.stale_ranges, vec!["ethereum".to_string()]);
        assert_eq!(report.alerts.len(), 1);
        assert!(report.alerts[0].context.range.is_none());
    }
}

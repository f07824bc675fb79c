//! Typed asset and alert-behavior documents
//!
//! These are the pre-validated inputs the engine consumes read-only.

use serde::{Deserialize, Serialize};

/// One tracked asset and its alert conditions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetConfig {
    /// Canonical lowercase key into the market API (e.g. "bitcoin")
    pub id: String,
    pub name: String,
    pub symbol: String,
    /// Drawdown thresholds in percent (e.g. 30, 40, 50)
    #[serde(default, rename = "ath_thresholds")]
    pub drawdown_thresholds: Vec<f64>,
    /// Absolute price targets in quote currency
    #[serde(default, rename = "price_alerts")]
    pub price_targets: Vec<f64>,
}

impl AssetConfig {
    pub fn new(id: &str, name: &str, symbol: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            symbol: symbol.to_string(),
            drawdown_thresholds: Vec::new(),
            price_targets: Vec::new(),
        }
    }

    pub fn with_thresholds(mut self, thresholds: &[f64]) -> Self {
        self.drawdown_thresholds = thresholds.to_vec();
        self.normalize();
        self
    }

    pub fn with_targets(mut self, targets: &[f64]) -> Self {
        self.price_targets = targets.to_vec();
        self.normalize();
        self
    }

    /// Display label, e.g. "Bitcoin (BTC)"
    pub fn label(&self) -> String {
        format!("{} ({})", self.name, self.symbol.to_uppercase())
    }

    pub fn has_drawdown_thresholds(&self) -> bool {
        !self.drawdown_thresholds.is_empty()
    }

    pub fn has_price_targets(&self) -> bool {
        !self.price_targets.is_empty()
    }

    /// Treat thresholds and targets as sets: ascending, no duplicates, finite only
    pub fn normalize(&mut self) {
        normalize_set(&mut self.drawdown_thresholds);
        normalize_set(&mut self.price_targets);
    }
}

fn normalize_set(values: &mut Vec<f64>) {
    values.retain(|v| v.is_finite());
    values.sort_by(|a, b| a.total_cmp(b));
    values.dedup();
}

/// The asset list document (`coins_config.json`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoinsConfig {
    pub coins: Vec<AssetConfig>,
}

impl CoinsConfig {
    pub fn ids(&self) -> Vec<String> {
        self.coins.iter().map(|c| c.id.clone()).collect()
    }

    pub fn normalize(&mut self) {
        for coin in &mut self.coins {
            coin.normalize();
        }
    }
}

/// The alert-behavior document (`alert_config.json`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertBehavior {
    /// Re-arm every condition when the calendar day changes
    #[serde(default = "default_true")]
    pub reset_alerts_daily: bool,
    /// Interval hint for `--watch`
    #[serde(default = "default_interval")]
    pub check_interval_minutes: u64,
    /// Cap on alerts delivered per cycle; the rest are deferred
    #[serde(default = "default_max_alerts")]
    pub max_alerts_per_run: usize,
    /// Dedup state file
    #[serde(default = "default_tracking_file")]
    pub alert_tracking_file: String,
}

fn default_true() -> bool {
    true
}

fn default_interval() -> u64 {
    15
}

fn default_max_alerts() -> usize {
    20
}

fn default_tracking_file() -> String {
    "sent_alerts.json".to_string()
}

impl Default for AlertBehavior {
    fn default() -> Self {
        Self {
            reset_alerts_daily: default_true(),
            check_interval_minutes: default_interval(),
            max_alerts_per_run: default_max_alerts(),
            alert_tracking_file: default_tracking_file(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asset_document_uses_wire_field_names() {
        let json = r#"{
            "id": "bitcoin",
            "name": "Bitcoin",
            "symbol": "btc",
            "ath_thresholds": [50, 30, 40, 30],
            "price_alerts": [80000, 70000]
        }"#;
        let mut asset: AssetConfig = serde_json::from_str(json).unwrap();
        asset.normalize();

        assert_eq!(asset.drawdown_thresholds, vec![30.0, 40.0, 50.0]);
        assert_eq!(asset.price_targets, vec![70000.0, 80000.0]);
        assert_eq!(asset.label(), "Bitcoin (BTC)");
    }

    #[test]
    fn conditions_are_optional() {
        let asset: AssetConfig =
            serde_json::from_str(r#"{"id": "solana", "name": "Solana", "symbol": "SOL"}"#)
                .unwrap();
        assert!(!asset.has_drawdown_thresholds());
        assert!(!asset.has_price_targets());
    }

    #[test]
    fn behavior_defaults_fill_missing_fields() {
        let behavior: AlertBehavior =
            serde_json::from_str(r#"{"reset_alerts_daily": false}"#).unwrap();
        assert!(!behavior.reset_alerts_daily);
        assert_eq!(behavior.check_interval_minutes, 15);
        assert_eq!(behavior.max_alerts_per_run, 20);
        assert_eq!(behavior.alert_tracking_file, "sent_alerts.json");
    }
}

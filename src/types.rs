//! Core types used throughout CryptoAlert
//!
//! Defines alert classes, dedup keys, computed alerts and the percentage helpers
//! shared by the engine and the notification formatter.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The two alert classes the engine evaluates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertClass {
    /// Percentage drop from the all-time high crossed a threshold
    Drawdown,
    /// Absolute price fell to or below a target
    Target,
}

impl AlertClass {
    /// Tag used inside dedup keys (`bitcoin_ath_30`, `bitcoin_price_70000`)
    pub fn key_tag(&self) -> &'static str {
        match self {
            AlertClass::Drawdown => "ath",
            AlertClass::Target => "price",
        }
    }
}

impl fmt::Display for AlertClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertClass::Drawdown => write!(f, "drawdown"),
            AlertClass::Target => write!(f, "target"),
        }
    }
}

/// Deterministic identifier of one (asset, class, value) condition.
///
/// Integral values render without a fractional part, so a threshold of `30.0`
/// and a configured `30` produce the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertKey(String);

impl AlertKey {
    pub fn new(asset_id: &str, class: AlertClass, value: f64) -> Self {
        AlertKey(format!(
            "{}_{}_{}",
            asset_id,
            class.key_tag(),
            format_key_value(value)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for AlertKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<AlertKey> for String {
    fn from(key: AlertKey) -> Self {
        key.0
    }
}

fn format_key_value(value: f64) -> String {
    // f64's Display already drops a zero fraction ("30", "0.5")
    if value == 0.0 {
        "0".to_string()
    } else {
        format!("{}", value)
    }
}

/// `(reference - current) / reference * 100`, never clamped.
///
/// A zero reference yields `0.0` instead of an infinity or NaN.
pub fn pct_below(reference: f64, current: f64) -> f64 {
    if reference == 0.0 {
        return 0.0;
    }
    (reference - current) / reference * 100.0
}

/// `(current - reference) / reference * 100`, the mirror of [`pct_below`].
pub fn pct_above(reference: f64, current: f64) -> f64 {
    if reference == 0.0 {
        return 0.0;
    }
    (current - reference) / reference * 100.0
}

/// 52-week range enrichment attached to an alert
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RangeContext {
    pub high_52w: f64,
    pub low_52w: f64,
    /// Percent below the 52-week high (negative when above it)
    pub pct_from_high: f64,
    /// Percent above the 52-week low (negative when below it)
    pub pct_from_low: f64,
}

impl RangeContext {
    pub fn new(high_52w: f64, low_52w: f64, current_price: f64) -> Self {
        Self {
            high_52w,
            low_52w,
            pct_from_high: pct_below(high_52w, current_price),
            pct_from_low: pct_above(low_52w, current_price),
        }
    }
}

/// Auxiliary market context captured at evaluation time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketContext {
    pub change_24h_pct: Option<f64>,
    pub change_7d_pct: Option<f64>,
    pub market_cap_rank: Option<u32>,
    pub range: Option<RangeContext>,
}

/// Class-specific alert fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AlertKind {
    Drawdown {
        ath_price: f64,
        drop_percent: f64,
        threshold: f64,
    },
    Target {
        target_price: f64,
        /// `current - target`
        price_diff: f64,
        /// `(current - target) / target * 100`
        price_diff_percent: f64,
    },
}

impl AlertKind {
    pub fn class(&self) -> AlertClass {
        match self {
            AlertKind::Drawdown { .. } => AlertClass::Drawdown,
            AlertKind::Target { .. } => AlertClass::Target,
        }
    }
}

/// A computed, transient alert. Never persisted; only its keys are.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub asset_id: String,
    /// Display label, e.g. "Bitcoin (BTC)"
    pub label: String,
    pub current_price: f64,
    pub kind: AlertKind,
    pub context: MarketContext,
    /// Every dedup key this alert consumes (all qualifying conditions of the asset)
    pub consumed_keys: Vec<AlertKey>,
}

impl Alert {
    pub fn class(&self) -> AlertClass {
        self.kind.class()
    }

    /// Dedup key of the representative condition
    pub fn key(&self) -> AlertKey {
        let value = match self.kind {
            AlertKind::Drawdown { threshold, .. } => threshold,
            AlertKind::Target { target_price, .. } => target_price,
        };
        AlertKey::new(&self.asset_id, self.class(), value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alert_keys_render_integral_values_without_fraction() {
        assert_eq!(
            AlertKey::new("bitcoin", AlertClass::Drawdown, 30.0).as_str(),
            "bitcoin_ath_30"
        );
        assert_eq!(
            AlertKey::new("bitcoin", AlertClass::Target, 70000.0).as_str(),
            "bitcoin_price_70000"
        );
        assert_eq!(
            AlertKey::new("shiba-inu", AlertClass::Target, 0.00001).as_str(),
            "shiba-inu_price_0.00001"
        );
    }

    #[test]
    fn percentages_are_not_clamped() {
        assert!((pct_below(69000.0, 48300.0) - 30.0).abs() < 1e-9);
        // price above the reference gives a negative drop
        assert!(pct_below(100.0, 110.0) < 0.0);
        assert!((pct_above(70000.0, 69000.0) + 1.428_571).abs() < 1e-4);
    }

    #[test]
    fn zero_reference_short_circuits() {
        assert_eq!(pct_below(0.0, 10.0), 0.0);
        assert_eq!(pct_above(0.0, 10.0), 0.0);
    }

    #[test]
    fn range_context_passes_negative_values_through() {
        let ctx = RangeContext::new(100.0, 50.0, 120.0);
        assert!((ctx.pct_from_high + 20.0).abs() < 1e-9);
        assert!((ctx.pct_from_low - 140.0).abs() < 1e-9);

        let below_low = RangeContext::new(100.0, 50.0, 40.0);
        assert!(below_low.pct_from_low < 0.0);
    }
}

//! Alert Evaluation Engine
//!
//! Decides, for one polling cycle, which conditions newly crossed a threshold,
//! picks at most one alert per asset, and returns the updated dedup state.
//! `evaluate` is pure apart from logging: no I/O, no clocks, no sleeping.

pub mod dedup;

pub use dedup::DedupState;

use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::config::AssetConfig;
use crate::market::{AssetQuote, GatewayError, MarketSnapshot};
use crate::ranges::RangeCache;
use crate::types::{pct_above, pct_below, Alert, AlertClass, AlertKey, AlertKind, MarketContext, RangeContext};

/// Source of all-time-high prices
pub trait AthLookup {
    fn ath(&self, asset_id: &str) -> Result<f64, GatewayError>;
}

impl<F> AthLookup for F
where
    F: Fn(&str) -> Result<f64, GatewayError>,
{
    fn ath(&self, asset_id: &str) -> Result<f64, GatewayError> {
        self(asset_id)
    }
}

/// Results of lookups performed ahead of evaluation
#[derive(Debug, Clone, Default)]
pub struct PrefetchedAth(HashMap<String, Result<f64, GatewayError>>);

impl PrefetchedAth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, asset_id: &str, result: Result<f64, GatewayError>) {
        self.0.insert(asset_id.to_string(), result);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AthLookup for PrefetchedAth {
    fn ath(&self, asset_id: &str) -> Result<f64, GatewayError> {
        match self.0.get(asset_id) {
            Some(result) => result.clone(),
            None => Err(GatewayError::Transport(format!(
                "no ATH lookup was performed for {}",
                asset_id
            ))),
        }
    }
}

/// Whether `asset` still has a drawdown threshold that could fire, i.e. an
/// ATH lookup is worth making this cycle
pub fn needs_ath_lookup(asset: &AssetConfig, state: &DedupState) -> bool {
    asset
        .drawdown_thresholds
        .iter()
        .any(|&t| !state.is_sent(&AlertKey::new(&asset.id, AlertClass::Drawdown, t)))
}

/// Output of one evaluation pass
#[derive(Debug, Clone)]
pub struct Evaluation {
    /// At most one per asset, in configuration order
    pub alerts: Vec<Alert>,
    /// Prior state plus every newly marked key
    pub state: DedupState,
    pub newly_sent: Vec<AlertKey>,
    /// Configured assets the snapshot did not contain
    pub missing_quotes: Vec<String>,
    /// Assets whose drawdown evaluation was skipped
    pub ath_failures: Vec<(String, GatewayError)>,
}

impl Evaluation {
    /// Whether the state differs from the prior one
    pub fn changed(&self) -> bool {
        !self.newly_sent.is_empty()
    }

    /// Keep the first `max` alerts. The rest are removed and their keys unmarked,
    /// so they fire again on a later cycle.
    pub fn defer_beyond(&mut self, max: usize) -> Vec<Alert> {
        if self.alerts.len() <= max {
            return Vec::new();
        }
        let deferred = self.alerts.split_off(max);
        for alert in &deferred {
            for key in &alert.consumed_keys {
                self.state.unmark(key);
            }
        }
        self.newly_sent
            .retain(|key| !deferred.iter().any(|a| a.consumed_keys.contains(key)));
        deferred
    }
}

/// A qualifying condition of one class for one asset
#[derive(Debug, Clone)]
struct Candidate {
    kind: AlertKind,
    /// Price level the condition represents; lower means a deeper move
    effective_price: f64,
    /// Keys of every condition that qualified this cycle
    qualifying: Vec<AlertKey>,
}

enum DrawdownOutcome {
    NotApplicable,
    Candidate(Candidate),
    LookupFailed(GatewayError),
}

fn drawdown_candidate(
    asset: &AssetConfig,
    current_price: f64,
    prior: &DedupState,
    ath_lookup: &dyn AthLookup,
) -> DrawdownOutcome {
    if !needs_ath_lookup(asset, prior) {
        return DrawdownOutcome::NotApplicable;
    }
    let unsent = asset
        .drawdown_thresholds
        .iter()
        .map(|&t| (t, AlertKey::new(&asset.id, AlertClass::Drawdown, t)))
        .filter(|(_, key)| !prior.is_sent(key));

    let ath_price = match ath_lookup.ath(&asset.id) {
        Ok(ath) if ath.is_finite() && ath > 0.0 => ath,
        Ok(ath) => {
            return DrawdownOutcome::LookupFailed(GatewayError::Decode(format!(
                "invalid ATH {}",
                ath
            )))
        }
        Err(e) => return DrawdownOutcome::LookupFailed(e),
    };

    let drop_percent = pct_below(ath_price, current_price);
    info!(
        asset = %asset.id,
        current = current_price,
        ath = ath_price,
        drop_pct = %format!("{:.2}", drop_percent),
        "Drawdown from ATH"
    );

    let qualifying: Vec<(f64, AlertKey)> = unsent
        .filter(|(t, _)| drop_percent >= *t)
        .collect();
    let threshold = qualifying
        .iter()
        .map(|(t, _)| *t)
        .fold(None, |best: Option<f64>, t| Some(best.map_or(t, |b| b.max(t))));
    let Some(threshold) = threshold else {
        return DrawdownOutcome::NotApplicable;
    };

    DrawdownOutcome::Candidate(Candidate {
        kind: AlertKind::Drawdown {
            ath_price,
            drop_percent,
            threshold,
        },
        effective_price: ath_price * (1.0 - threshold / 100.0),
        qualifying: qualifying.into_iter().map(|(_, key)| key).collect(),
    })
}

fn target_candidate(asset: &AssetConfig, current_price: f64, prior: &DedupState) -> Option<Candidate> {
    let qualifying: Vec<(f64, AlertKey)> = asset
        .price_targets
        .iter()
        .map(|&p| (p, AlertKey::new(&asset.id, AlertClass::Target, p)))
        .filter(|(p, key)| !prior.is_sent(key) && *p >= current_price)
        .collect();

    let target_price = qualifying
        .iter()
        .map(|(p, _)| *p)
        .fold(None, |best: Option<f64>, p| Some(best.map_or(p, |b| b.min(p))))?;

    Some(Candidate {
        kind: AlertKind::Target {
            target_price,
            price_diff: current_price - target_price,
            price_diff_percent: pct_above(target_price, current_price),
        },
        effective_price: target_price,
        qualifying: qualifying.into_iter().map(|(_, key)| key).collect(),
    })
}

/// Pick the candidate with the lower effective price; drawdown wins ties
fn choose(drawdown: Option<Candidate>, target: Option<Candidate>) -> Option<Candidate> {
    match (drawdown, target) {
        (Some(d), Some(t)) => {
            let (winner, loser) = if t.effective_price < d.effective_price {
                (t, d)
            } else {
                (d, t)
            };
            debug!(
                chosen = %winner.kind.class(),
                chosen_effective = winner.effective_price,
                suppressed = %loser.kind.class(),
                suppressed_effective = loser.effective_price,
                "Both classes fired, keeping the deeper move"
            );
            Some(winner)
        }
        (d, t) => d.or(t),
    }
}

fn market_context(quote: &AssetQuote, ranges: &RangeCache) -> MarketContext {
    MarketContext {
        change_24h_pct: quote.change_24h_pct,
        change_7d_pct: quote.change_7d_pct,
        market_cap_rank: quote.market_cap_rank,
        range: ranges
            .get(&quote.id)
            .map(|r| RangeContext::new(r.high_52w, r.low_52w, quote.current_price)),
    }
}

/// Evaluate every configured asset against one market snapshot.
///
/// Thresholds and targets already marked in `prior` never fire again. All
/// conditions that qualify this cycle are marked sent, including those of a
/// class that lost the one-alert-per-asset selection.
pub fn evaluate(
    assets: &[AssetConfig],
    snapshot: &MarketSnapshot,
    ranges: &RangeCache,
    prior: &DedupState,
    ath_lookup: &dyn AthLookup,
) -> Evaluation {
    let mut evaluation = Evaluation {
        alerts: Vec::new(),
        state: prior.clone(),
        newly_sent: Vec::new(),
        missing_quotes: Vec::new(),
        ath_failures: Vec::new(),
    };

    for asset in assets {
        let Some(quote) = snapshot.get(&asset.id) else {
            debug!(asset = %asset.id, "Asset missing from market snapshot, skipping");
            evaluation.missing_quotes.push(asset.id.clone());
            continue;
        };
        let current_price = quote.current_price;

        let drawdown = if asset.has_drawdown_thresholds() {
            match drawdown_candidate(asset, current_price, prior, ath_lookup) {
                DrawdownOutcome::Candidate(c) => Some(c),
                DrawdownOutcome::NotApplicable => None,
                DrawdownOutcome::LookupFailed(e) => {
                    warn!(
                        asset = %asset.id,
                        call = "ath",
                        error = %e,
                        "ATH lookup failed, skipping drawdown evaluation for this asset"
                    );
                    evaluation.ath_failures.push((asset.id.clone(), e));
                    None
                }
            }
        } else {
            None
        };

        let target = if asset.has_price_targets() {
            target_candidate(asset, current_price, prior)
        } else {
            None
        };

        let mut consumed: Vec<AlertKey> = Vec::new();
        for candidate in drawdown.iter().chain(target.iter()) {
            for key in &candidate.qualifying {
                if !consumed.contains(key) {
                    consumed.push(key.clone());
                }
            }
        }

        let Some(chosen) = choose(drawdown, target) else {
            continue;
        };

        for key in &consumed {
            evaluation.state.mark_sent(key);
            evaluation.newly_sent.push(key.clone());
        }

        let alert = Alert {
            asset_id: asset.id.clone(),
            label: asset.label(),
            current_price,
            kind: chosen.kind,
            context: market_context(quote, ranges),
            consumed_keys: consumed,
        };
        info!(
            asset = %alert.asset_id,
            class = %alert.class(),
            key = %alert.key(),
            consumed = alert.consumed_keys.len(),
            "Alert triggered"
        );
        evaluation.alerts.push(alert);
    }

    evaluation
}

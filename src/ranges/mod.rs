//! 52-week range cache
//!
//! A side-store of per-asset 52-week high/low, refreshed by its own job
//! (`refresh_ranges`) and only read by the alert cycle.

mod refresher;

pub use refresher::{RangeRefresher, RefreshReport, RefreshSettings};

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

use crate::persistence::{self, StoreError};

/// 52-week high/low for one asset
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RangeStats {
    pub high_52w: f64,
    pub low_52w: f64,
    pub updated_at: NaiveDate,
}

impl RangeStats {
    /// Reduce a price series to (max, min). Non-finite points are ignored.
    pub fn from_series(prices: &[f64], updated_at: NaiveDate) -> Option<Self> {
        let mut finite = prices.iter().copied().filter(|p| p.is_finite());
        let first = finite.next()?;
        let (high, low) = finite.fold((first, first), |(hi, lo), p| (hi.max(p), lo.min(p)));
        Some(Self {
            high_52w: high,
            low_52w: low,
            updated_at,
        })
    }

    pub fn age_days(&self, today: NaiveDate) -> i64 {
        (today - self.updated_at).num_days()
    }

    pub fn is_stale(&self, today: NaiveDate, max_age_days: i64) -> bool {
        is_stale(Some(self.updated_at), today, max_age_days)
    }
}

/// `true` when there is no date or it is more than `max_age_days` old
pub fn is_stale(last_updated: Option<NaiveDate>, today: NaiveDate, max_age_days: i64) -> bool {
    match last_updated {
        None => true,
        Some(date) => (today - date).num_days() > max_age_days,
    }
}

fn lenient_date<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(|s| match NaiveDate::parse_from_str(&s, "%Y-%m-%d") {
        Ok(date) => Some(date),
        Err(_) => {
            warn!(value = %s, "Invalid last_updated date in range cache, treating as stale");
            None
        }
    }))
}

/// Freshness of one configured asset's entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    Fresh { age_days: i64 },
    Stale { age_days: i64 },
    Missing,
}

/// Result of [`RangeCache::check`]
#[derive(Debug, Clone, PartialEq)]
pub struct CacheCheck {
    /// Document-level `last_updated` is missing or too old
    pub cache_stale: bool,
    /// One entry per configured id, in the order given
    pub entries: Vec<(String, EntryStatus)>,
}

impl CacheCheck {
    pub fn is_healthy(&self) -> bool {
        !self.cache_stale
            && self
                .entries
                .iter()
                .all(|(_, status)| matches!(status, EntryStatus::Fresh { .. }))
    }

    pub fn problems(&self) -> impl Iterator<Item = &(String, EntryStatus)> {
        self.entries
            .iter()
            .filter(|(_, status)| !matches!(status, EntryStatus::Fresh { .. }))
    }
}

/// The persisted range cache document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RangeCache {
    #[serde(default, deserialize_with = "lenient_date")]
    pub last_updated: Option<NaiveDate>,
    #[serde(default)]
    pub coins: BTreeMap<String, RangeStats>,
}

impl RangeCache {
    /// Load the cache; a missing file is an empty cache
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        Ok(persistence::load_document(path)?.unwrap_or_default())
    }

    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        persistence::save_document(path, self)
    }

    pub fn get(&self, id: &str) -> Option<&RangeStats> {
        self.coins.get(id)
    }

    pub fn upsert(&mut self, id: &str, stats: RangeStats) {
        self.coins.insert(id.to_string(), stats);
    }

    pub fn len(&self) -> usize {
        self.coins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coins.is_empty()
    }

    pub fn is_stale(&self, today: NaiveDate, max_age_days: i64) -> bool {
        is_stale(self.last_updated, today, max_age_days)
    }

    /// Per-asset age of every configured id, plus the document-level staleness
    pub fn check(&self, ids: &[String], today: NaiveDate, max_age_days: i64) -> CacheCheck {
        let entries = ids
            .iter()
            .map(|id| {
                let status = match self.get(id) {
                    None => EntryStatus::Missing,
                    Some(stats) => {
                        let age_days = stats.age_days(today);
                        if stats.is_stale(today, max_age_days) {
                            EntryStatus::Stale { age_days }
                        } else {
                            EntryStatus::Fresh { age_days }
                        }
                    }
                };
                (id.clone(), status)
            })
            .collect();
        CacheCheck {
            cache_stale: self.is_stale(today, max_age_days),
            entries,
        }
    }

    /// Split into entries that are still fresh and the ids of stale ones
    pub fn partition_fresh(&self, today: NaiveDate, max_age_days: i64) -> (RangeCache, Vec<String>) {
        let mut fresh = RangeCache {
            last_updated: self.last_updated,
            coins: BTreeMap::new(),
        };
        let mut stale = Vec::new();
        for (id, stats) in &self.coins {
            if stats.is_stale(today, max_age_days) {
                stale.push(id.clone());
            } else {
                fresh.coins.insert(id.clone(), *stats);
            }
        }
        (fresh, stale)
    }
}

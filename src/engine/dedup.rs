//! Dedup state
//!
//! Which alert keys have already been sent, stamped with the day they belong to.
//! Loaded at cycle start (re-armed when the day changed) and written back in full
//! at cycle end when new keys were marked.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

use crate::persistence::{self, StoreError};
use crate::types::AlertKey;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupState {
    pub date: NaiveDate,
    #[serde(rename = "sent_alerts", default)]
    sent: BTreeMap<String, bool>,
}

impl DedupState {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            sent: BTreeMap::new(),
        }
    }

    /// Builder for pre-populated states
    pub fn with_sent<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for key in keys {
            self.sent.insert(key.into(), true);
        }
        self
    }

    pub fn is_sent(&self, key: &AlertKey) -> bool {
        self.sent.get(key.as_str()).copied().unwrap_or(false)
    }

    pub(crate) fn mark_sent(&mut self, key: &AlertKey) {
        self.sent.insert(key.as_str().to_string(), true);
    }

    pub(crate) fn unmark(&mut self, key: &AlertKey) {
        self.sent.remove(key.as_str());
    }

    /// Keys currently marked sent
    pub fn sent_keys(&self) -> impl Iterator<Item = &str> {
        self.sent
            .iter()
            .filter(|(_, sent)| **sent)
            .map(|(key, _)| key.as_str())
    }

    pub fn len(&self) -> usize {
        self.sent_keys().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Move the state to `today`. When the day changed and `reset_daily` is on,
    /// every key is cleared. Returns whether a reset happened.
    pub fn rearm(&mut self, today: NaiveDate, reset_daily: bool) -> bool {
        if self.date == today {
            return false;
        }
        let reset = reset_daily;
        if reset {
            info!(
                previous = %self.date,
                today = %today,
                cleared = self.len(),
                "New day, re-arming all alerts"
            );
            self.sent.clear();
        }
        self.date = today;
        reset
    }

    /// Load the state for `today`. A missing file starts empty; an unreadable or
    /// corrupt file is logged and also starts empty.
    pub fn load(path: &Path, today: NaiveDate, reset_daily: bool) -> Self {
        match persistence::load_document::<DedupState>(path) {
            Ok(Some(mut state)) => {
                state.rearm(today, reset_daily);
                state
            }
            Ok(None) => {
                info!(path = %path.display(), "No alert tracking file yet, starting fresh");
                DedupState::new(today)
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    remediation = e.remediation(),
                    "Alert tracking file unusable, starting fresh (already-sent alerts may repeat)"
                );
                DedupState::new(today)
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        persistence::save_document(path, self)
    }
}

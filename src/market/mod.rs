//! Market Data Gateway
//!
//! Bulk current quotes, per-asset all-time-high lookups and historical price
//! series. The gateway never sleeps between calls on its own; inter-call pacing
//! is the caller's job (see `cycle` and `ranges::RangeRefresher`).

mod coingecko;
pub mod retry;

pub use coingecko::CoinGeckoClient;
pub use retry::RetryPolicy;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("rate limited by market API")]
    RateLimited { retry_after: Option<Duration> },
    #[error("market API returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed response: {0}")]
    Decode(String),
    #[error("no price data returned")]
    EmptySeries,
}

impl GatewayError {
    /// Map a non-success status to an error
    pub fn from_status(status: StatusCode, retry_after: Option<Duration>, body: &str) -> Self {
        if status == StatusCode::TOO_MANY_REQUESTS {
            return GatewayError::RateLimited { retry_after };
        }
        let mut body = body.trim().to_string();
        if body.len() > 200 {
            let mut cut = 200;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        GatewayError::Http {
            status: status.as_u16(),
            body,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, GatewayError::RateLimited { .. })
    }

    /// Rate limits, timeouts and 5xx responses
    pub fn is_transient(&self) -> bool {
        match self {
            GatewayError::RateLimited { .. } | GatewayError::Timeout => true,
            GatewayError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            GatewayError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GatewayError::Timeout
        } else if e.is_decode() {
            GatewayError::Decode(e.to_string())
        } else {
            GatewayError::Transport(e.to_string())
        }
    }
}

/// Current market data for one asset
#[derive(Debug, Clone, PartialEq)]
pub struct AssetQuote {
    pub id: String,
    pub name: String,
    pub symbol: String,
    pub current_price: f64,
    pub change_24h_pct: Option<f64>,
    pub change_7d_pct: Option<f64>,
    pub market_cap_rank: Option<u32>,
    pub total_volume: Option<f64>,
    pub market_cap: Option<f64>,
}

impl AssetQuote {
    pub fn new(id: &str, current_price: f64) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            symbol: String::new(),
            current_price,
            change_24h_pct: None,
            change_7d_pct: None,
            market_cap_rank: None,
            total_volume: None,
            market_cap: None,
        }
    }
}

/// All quotes from one bulk gateway call, sharing one fetch timestamp
#[derive(Debug, Clone, PartialEq)]
pub struct MarketSnapshot {
    pub fetched_at: DateTime<Utc>,
    quotes: HashMap<String, AssetQuote>,
}

impl MarketSnapshot {
    pub fn new(fetched_at: DateTime<Utc>) -> Self {
        Self {
            fetched_at,
            quotes: HashMap::new(),
        }
    }

    pub fn with_quote(mut self, quote: AssetQuote) -> Self {
        self.insert(quote);
        self
    }

    pub fn insert(&mut self, quote: AssetQuote) {
        self.quotes.insert(quote.id.clone(), quote);
    }

    pub fn get(&self, id: &str) -> Option<&AssetQuote> {
        self.quotes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.quotes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.quotes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quotes.is_empty()
    }
}

/// Trait for market data providers
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketDataGateway: Send + Sync {
    /// Provider name for logs
    fn name(&self) -> &'static str;

    /// Bulk current quotes for the given ids in a single batched call.
    /// Ids the provider does not know are simply absent from the snapshot.
    async fn fetch_snapshot(&self, ids: &[String]) -> Result<MarketSnapshot, GatewayError>;

    /// All-time-high price for one asset
    async fn fetch_ath(&self, id: &str) -> Result<f64, GatewayError>;

    /// Price series covering the last `days` days
    async fn fetch_price_series(&self, id: &str, days: u32) -> Result<Vec<f64>, GatewayError>;
}

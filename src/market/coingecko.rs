//! CoinGecko v3 REST client
//!
//! Endpoints: `/coins/markets` (bulk quotes), `/coins/{id}` (ATH) and
//! `/coins/{id}/market_chart` (price series).

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, RETRY_AFTER};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::retry::RetryPolicy;
use super::{AssetQuote, GatewayError, MarketDataGateway, MarketSnapshot};
use crate::config::{GatewayConfig, RangesConfig};

#[derive(Debug, Clone, Deserialize)]
struct MarketEntry {
    id: String,
    #[serde(default)]
    symbol: String,
    #[serde(default)]
    name: String,
    current_price: Option<f64>,
    market_cap: Option<f64>,
    market_cap_rank: Option<u32>,
    total_volume: Option<f64>,
    price_change_percentage_24h: Option<f64>,
    price_change_percentage_24h_in_currency: Option<f64>,
    price_change_percentage_7d_in_currency: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
struct CoinDetail {
    market_data: Option<CoinMarketData>,
}

#[derive(Debug, Clone, Deserialize)]
struct CoinMarketData {
    #[serde(default)]
    ath: HashMap<String, Option<f64>>,
}

#[derive(Debug, Clone, Deserialize)]
struct MarketChart {
    #[serde(default)]
    prices: Vec<(f64, Option<f64>)>,
}

fn snapshot_from_entries(entries: Vec<MarketEntry>, fetched_at: DateTime<Utc>) -> MarketSnapshot {
    let mut snapshot = MarketSnapshot::new(fetched_at);
    for entry in entries {
        let Some(current_price) = entry.current_price.filter(|p| p.is_finite()) else {
            warn!(asset = %entry.id, call = "markets", "No current price in response, skipping asset");
            continue;
        };
        snapshot.insert(AssetQuote {
            id: entry.id,
            name: entry.name,
            symbol: entry.symbol,
            current_price,
            change_24h_pct: entry
                .price_change_percentage_24h_in_currency
                .or(entry.price_change_percentage_24h),
            change_7d_pct: entry.price_change_percentage_7d_in_currency,
            market_cap_rank: entry.market_cap_rank,
            total_volume: entry.total_volume,
            market_cap: entry.market_cap,
        });
    }
    snapshot
}

fn ath_from_detail(detail: &CoinDetail, vs_currency: &str) -> Result<f64, GatewayError> {
    detail
        .market_data
        .as_ref()
        .and_then(|md| md.ath.get(vs_currency).copied().flatten())
        .filter(|ath| ath.is_finite() && *ath > 0.0)
        .ok_or_else(|| GatewayError::Decode(format!("missing market_data.ath.{}", vs_currency)))
}

fn prices_from_chart(chart: MarketChart) -> Result<Vec<f64>, GatewayError> {
    let prices: Vec<f64> = chart
        .prices
        .into_iter()
        .filter_map(|(_, price)| price.filter(|p| p.is_finite()))
        .collect();
    if prices.is_empty() {
        return Err(GatewayError::EmptySeries);
    }
    Ok(prices)
}

/// REST client for the CoinGecko public API
pub struct CoinGeckoClient {
    client: Client,
    base_url: String,
    vs_currency: String,
    snapshot_policy: RetryPolicy,
    ath_policy: RetryPolicy,
    series_policy: RetryPolicy,
}

impl CoinGeckoClient {
    /// Create a client with single-attempt policies
    pub fn new(base_url: &str, vs_currency: &str, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Ok(key) = std::env::var("COINGECKO_API_KEY") {
            if !key.trim().is_empty() {
                let value = HeaderValue::from_str(key.trim())
                    .context("COINGECKO_API_KEY is not a valid header value")?;
                headers.insert("x-cg-demo-api-key", value);
            }
        }

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .user_agent(concat!("cryptoalert/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            vs_currency: vs_currency.to_lowercase(),
            snapshot_policy: RetryPolicy::no_retry(),
            ath_policy: RetryPolicy::no_retry(),
            series_policy: RetryPolicy::no_retry(),
        })
    }

    /// Create a client with the configured retry policies
    pub fn from_config(gateway: &GatewayConfig, ranges: &RangesConfig) -> Result<Self> {
        let step = Duration::from_secs(gateway.rate_limit_backoff_secs);
        Ok(Self::new(
            &gateway.base_url,
            &gateway.vs_currency,
            Duration::from_secs(gateway.request_timeout_secs),
        )?
        .with_snapshot_policy(RetryPolicy::linear_transient(
            gateway.transient_max_attempts,
            step,
        ))
        .with_ath_policy(RetryPolicy::linear_rate_limit(
            gateway.rate_limit_max_attempts,
            step,
        ))
        .with_series_policy(RetryPolicy::linear_rate_limit(
            ranges.rate_limit_max_attempts,
            Duration::from_secs(ranges.rate_limit_backoff_secs),
        )))
    }

    pub fn with_snapshot_policy(mut self, policy: RetryPolicy) -> Self {
        self.snapshot_policy = policy;
        self
    }

    pub fn with_ath_policy(mut self, policy: RetryPolicy) -> Self {
        self.ath_policy = policy;
        self
    }

    pub fn with_series_policy(mut self, policy: RetryPolicy) -> Self {
        self.series_policy = policy;
        self
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, GatewayError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.get(&url).query(query).send().await?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::from_status(status, retry_after, &body));
        }

        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| GatewayError::Decode(e.to_string()))
    }
}

#[async_trait]
impl MarketDataGateway for CoinGeckoClient {
    fn name(&self) -> &'static str {
        "CoinGecko"
    }

    async fn fetch_snapshot(&self, ids: &[String]) -> Result<MarketSnapshot, GatewayError> {
        if ids.is_empty() {
            return Ok(MarketSnapshot::new(Utc::now()));
        }
        let query = [
            ("vs_currency", self.vs_currency.clone()),
            ("ids", ids.join(",")),
            ("order", "market_cap_desc".to_string()),
            ("per_page", "250".to_string()),
            ("page", "1".to_string()),
            ("sparkline", "false".to_string()),
            ("price_change_percentage", "24h,7d".to_string()),
        ];

        let entries: Vec<MarketEntry> = self
            .snapshot_policy
            .run("markets", "bulk", || self.get_json("/coins/markets", &query))
            .await?;
        let snapshot = snapshot_from_entries(entries, Utc::now());

        debug!(
            requested = ids.len(),
            received = snapshot.len(),
            "Fetched market snapshot"
        );
        Ok(snapshot)
    }

    async fn fetch_ath(&self, id: &str) -> Result<f64, GatewayError> {
        let path = format!("/coins/{}", id);
        let query = [
            ("localization", "false".to_string()),
            ("tickers", "false".to_string()),
            ("market_data", "true".to_string()),
            ("community_data", "false".to_string()),
            ("developer_data", "false".to_string()),
        ];

        let detail: CoinDetail = self
            .ath_policy
            .run("ath", id, || self.get_json(&path, &query))
            .await?;
        let ath = ath_from_detail(&detail, &self.vs_currency)?;

        debug!(asset = %id, ath = ath, "Fetched all-time high");
        Ok(ath)
    }

    async fn fetch_price_series(&self, id: &str, days: u32) -> Result<Vec<f64>, GatewayError> {
        let path = format!("/coins/{}/market_chart", id);
        let query = [
            ("vs_currency", self.vs_currency.clone()),
            ("days", days.to_string()),
        ];

        let chart: MarketChart = self
            .series_policy
            .run("market_chart", id, || self.get_json(&path, &query))
            .await?;
        let prices = prices_from_chart(chart)?;

        info!(asset = %id, points = prices.len(), days = days, "Fetched price series");
        Ok(prices)
    }
}

//! CoinGecko client: fallback quotes and daily price history

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::domain::entities::quote::{Quote, QuoteMap};
use crate::domain::errors::QuoteError;
use crate::domain::repositories::quote_source::{HistorySource, QuoteSource};
use crate::rate_limit::{acquire, SharedRateLimiter};

pub const COINGECKO_API_BASE: &str = "https://api.coingecko.com/api/v3";

const DEFAULT_IDS: &[(&str, &str)] = &[
    ("BTC", "bitcoin"),
    ("ETH", "ethereum"),
    ("SOL", "solana"),
    ("BNB", "binancecoin"),
    ("XRP", "ripple"),
    ("DOGE", "dogecoin"),
];

#[derive(Debug, Clone)]
pub struct CoinGeckoConfig {
    pub api_base: String,
    pub timeout: Duration,
}

impl Default for CoinGeckoConfig {
    fn default() -> Self {
        Self {
            api_base: COINGECKO_API_BASE.to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SimplePrice {
    pub usd: f64,
    #[serde(default)]
    pub usd_24h_change: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct MarketChart {
    /// `[timestamp_ms, price]` pairs, oldest first
    #[serde(default)]
    pub prices: Vec<(f64, f64)>,
}

pub struct CoinGeckoClient {
    client: Client,
    config: CoinGeckoConfig,
    ids: HashMap<String, String>,
    limiter: Option<SharedRateLimiter>,
}

impl CoinGeckoClient {
    pub fn new(config: CoinGeckoConfig) -> Result<Self, QuoteError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| QuoteError::Source(format!("Failed to build CoinGecko client: {}", e)))?;

        Ok(Self {
            client,
            config,
            ids: DEFAULT_IDS
                .iter()
                .map(|(instrument, id)| (instrument.to_string(), id.to_string()))
                .collect(),
            limiter: None,
        })
    }

    pub fn with_rate_limiter(mut self, limiter: SharedRateLimiter) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// CoinGecko coin id; unmapped instruments fall back to their lowercase symbol.
    pub fn coin_id(&self, instrument: &str) -> String {
        self.ids
            .get(instrument)
            .cloned()
            .unwrap_or_else(|| instrument.to_lowercase())
    }

    /// Whether the instrument has a known coin id.
    pub fn supports(&self, instrument: &str) -> bool {
        self.ids.contains_key(instrument)
    }

    pub fn parse_prices(
        &self,
        instruments: &[String],
        mut body: HashMap<String, SimplePrice>,
    ) -> QuoteMap {
        let captured_at = Utc::now();
        instruments
            .iter()
            .filter_map(|instrument| {
                let price = body.remove(&self.coin_id(instrument))?;
                Some((
                    instrument.clone(),
                    Quote {
                        instrument: instrument.clone(),
                        price: price.usd,
                        change_24h: price.usd_24h_change.unwrap_or(0.0),
                        volume: 0.0,
                        source: "coingecko".to_string(),
                        captured_at,
                    },
                ))
            })
            .collect()
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, QuoteError> {
        if let Some(limiter) = &self.limiter {
            acquire(limiter).await;
        }

        let url = format!("{}{}", self.config.api_base, path);
        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| QuoteError::Source(format!("CoinGecko request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(QuoteError::Source(format!(
                "CoinGecko API error: {} - {}",
                status, error_text
            )));
        }

        response
            .json()
            .await
            .map_err(|e| QuoteError::Source(format!("Failed to parse CoinGecko response: {}", e)))
    }
}

#[async_trait]
impl QuoteSource for CoinGeckoClient {
    fn name(&self) -> &str {
        "coingecko"
    }

    async fn fetch_quotes(&self, instruments: &[String]) -> Result<QuoteMap, QuoteError> {
        if instruments.is_empty() {
            return Ok(QuoteMap::new());
        }
        let ids: Vec<String> = instruments.iter().map(|i| self.coin_id(i)).collect();
        let body: HashMap<String, SimplePrice> = self
            .get(
                "/simple/price",
                &[
                    ("ids", ids.join(",")),
                    ("vs_currencies", "usd".to_string()),
                    ("include_24hr_change", "true".to_string()),
                ],
            )
            .await?;

        Ok(self.parse_prices(instruments, body))
    }
}

#[async_trait]
impl HistorySource for CoinGeckoClient {
    async fn daily_closes(&self, instrument: &str, days: u32) -> Result<Vec<f64>, QuoteError> {
        let path = format!("/coins/{}/market_chart", self.coin_id(instrument));
        let chart: MarketChart = self
            .get(
                &path,
                &[
                    ("vs_currency", "usd".to_string()),
                    ("days", days.to_string()),
                    ("interval", "daily".to_string()),
                ],
            )
            .await?;

        Ok(chart.prices.into_iter().map(|(_, price)| price).collect())
    }
}

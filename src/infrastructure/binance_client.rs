//! Binance public market data client (primary quote source)

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use crate::domain::entities::quote::{Quote, QuoteMap};
use crate::domain::errors::QuoteError;
use crate::domain::repositories::quote_source::QuoteSource;
use crate::rate_limit::{acquire, SharedRateLimiter};

pub const BINANCE_API_BASE: &str = "https://api.binance.com/api/v3";

const DEFAULT_SYMBOLS: &[(&str, &str)] = &[
    ("BTC", "BTCUSDT"),
    ("ETH", "ETHUSDT"),
    ("SOL", "SOLUSDT"),
    ("BNB", "BNBUSDT"),
    ("XRP", "XRPUSDT"),
    ("DOGE", "DOGEUSDT"),
];

#[derive(Debug, Clone)]
pub struct BinanceConfig {
    pub api_base: String,
    pub timeout: Duration,
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self {
            api_base: BINANCE_API_BASE.to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}

/// One row of the 24h ticker endpoint. Numbers arrive as strings.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinanceTicker {
    pub symbol: String,
    pub last_price: String,
    pub price_change_percent: String,
    #[serde(default)]
    pub volume: Option<String>,
}

pub struct BinanceClient {
    client: Client,
    config: BinanceConfig,
    symbols: HashMap<String, String>,
    limiter: Option<SharedRateLimiter>,
}

impl BinanceClient {
    pub fn new(config: BinanceConfig) -> Result<Self, QuoteError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| QuoteError::Source(format!("Failed to build Binance client: {}", e)))?;

        Ok(Self {
            client,
            config,
            symbols: DEFAULT_SYMBOLS
                .iter()
                .map(|(instrument, symbol)| (instrument.to_string(), symbol.to_string()))
                .collect(),
            limiter: None,
        })
    }

    pub fn with_rate_limiter(mut self, limiter: SharedRateLimiter) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Exchange symbol for an instrument, if it is traded here.
    pub fn symbol_for(&self, instrument: &str) -> Option<&str> {
        self.symbols.get(instrument).map(String::as_str)
    }

    pub fn supports(&self, instrument: &str) -> bool {
        self.symbols.contains_key(instrument)
    }

    /// JSON array literal expected by the `symbols` query parameter.
    pub fn symbols_param(symbols: &[&str]) -> String {
        let quoted: Vec<String> = symbols.iter().map(|s| format!("\"{}\"", s)).collect();
        format!("[{}]", quoted.join(","))
    }

    /// Maps ticker rows back to instruments. Rows for unknown symbols and
    /// rows with unparsable numbers are dropped.
    pub fn parse_tickers(&self, tickers: Vec<BinanceTicker>) -> QuoteMap {
        let by_symbol: HashMap<&str, &str> = self
            .symbols
            .iter()
            .map(|(instrument, symbol)| (symbol.as_str(), instrument.as_str()))
            .collect();
        let captured_at = Utc::now();

        let mut quotes = QuoteMap::new();
        for ticker in tickers {
            let Some(instrument) = by_symbol.get(ticker.symbol.as_str()) else {
                continue;
            };
            let (Ok(price), Ok(change_24h)) = (
                ticker.last_price.parse::<f64>(),
                ticker.price_change_percent.parse::<f64>(),
            ) else {
                debug!(symbol = %ticker.symbol, "Skipping ticker with unparsable numbers");
                continue;
            };
            let volume = ticker
                .volume
                .as_deref()
                .and_then(|v| v.parse::<f64>().ok())
                .unwrap_or(0.0);

            quotes.insert(
                instrument.to_string(),
                Quote {
                    instrument: instrument.to_string(),
                    price,
                    change_24h,
                    volume,
                    source: "binance".to_string(),
                    captured_at,
                },
            );
        }
        quotes
    }
}

#[async_trait]
impl QuoteSource for BinanceClient {
    fn name(&self) -> &str {
        "binance"
    }

    async fn fetch_quotes(&self, instruments: &[String]) -> Result<QuoteMap, QuoteError> {
        let symbols: Vec<&str> = instruments
            .iter()
            .filter_map(|i| self.symbol_for(i))
            .collect();
        if symbols.is_empty() {
            return Ok(QuoteMap::new());
        }

        if let Some(limiter) = &self.limiter {
            acquire(limiter).await;
        }

        let url = format!("{}/ticker/24hr", self.config.api_base);
        let response = self
            .client
            .get(&url)
            .query(&[("symbols", Self::symbols_param(&symbols))])
            .send()
            .await
            .map_err(|e| QuoteError::Source(format!("Binance request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(QuoteError::Source(format!(
                "Binance API error: {} - {}",
                status, error_text
            )));
        }

        let tickers: Vec<BinanceTicker> = response
            .json()
            .await
            .map_err(|e| QuoteError::Source(format!("Failed to parse Binance response: {}", e)))?;

        Ok(self.parse_tickers(tickers))
    }
}

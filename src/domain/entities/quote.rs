use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Market quote for one instrument, as captured from a quote source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Quote {
    pub instrument: String,
    pub price: f64,
    pub change_24h: f64,
    pub volume: f64,
    pub source: String,
    pub captured_at: DateTime<Utc>,
}

/// Quotes keyed by instrument symbol.
pub type QuoteMap = BTreeMap<String, Quote>;

/// Last price per instrument, as consumed by portfolio valuation.
pub type PriceMap = HashMap<String, f64>;

pub fn prices_of(quotes: &QuoteMap) -> PriceMap {
    quotes
        .iter()
        .map(|(instrument, quote)| (instrument.clone(), quote.price))
        .collect()
}

/// Technical indicators attached to an instrument's market state.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Indicators {
    pub sma_7: f64,
    pub sma_14: f64,
    pub rsi_14: f64,
    pub current_price: f64,
    pub price_change_7d: f64,
}

/// What the decision function sees for one instrument.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketState {
    pub quote: Quote,
    pub indicators: Option<Indicators>,
}

/// One stored market history row. Snapshots taken from a single quote carry
/// the same price in all four fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceBar {
    pub instrument: String,
    pub resolution_seconds: i64,
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub source: String,
}

impl PriceBar {
    /// Snapshot of `quote` filed under the `resolution_seconds` bucket that
    /// contains `at`.
    pub fn from_quote(quote: &Quote, resolution_seconds: i64, at: DateTime<Utc>) -> Self {
        Self {
            instrument: quote.instrument.clone(),
            resolution_seconds,
            timestamp: bucket_start(at, resolution_seconds),
            open: quote.price,
            high: quote.price,
            low: quote.price,
            close: quote.price,
            volume: quote.volume,
            source: quote.source.clone(),
        }
    }
}

/// Floors `at` to a multiple of `resolution_seconds` since the epoch.
pub fn bucket_start(at: DateTime<Utc>, resolution_seconds: i64) -> DateTime<Utc> {
    let resolution = resolution_seconds.max(1);
    let seconds = at.timestamp();
    let floored = seconds - seconds.rem_euclid(resolution);
    DateTime::from_timestamp(floored, 0).unwrap_or(at)
}

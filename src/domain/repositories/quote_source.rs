use async_trait::async_trait;

use crate::domain::entities::quote::QuoteMap;
use crate::domain::errors::QuoteError;

/// A provider of current quotes for a set of instruments.
///
/// Instruments the provider cannot map are left out of the result rather than
/// failing the whole request; an empty map means nothing was usable.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_quotes(&self, instruments: &[String]) -> Result<QuoteMap, QuoteError>;
}

/// A provider of daily closing prices, oldest first.
#[async_trait]
pub trait HistorySource: Send + Sync {
    async fn daily_closes(&self, instrument: &str, days: u32) -> Result<Vec<f64>, QuoteError>;
}

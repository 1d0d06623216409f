use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::entities::portfolio::PortfolioView;
use crate::domain::entities::quote::MarketState;
use crate::domain::errors::DecisionError;

#[derive(Debug, Clone, Serialize)]
pub struct AccountContext {
    pub current_time: DateTime<Utc>,
    pub total_return_pct: f64,
    pub initial_capital: f64,
}

/// Everything the decision function is allowed to see for one cycle.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionRequest {
    /// In universe order.
    pub market: Vec<MarketState>,
    pub portfolio: PortfolioView,
    pub account: AccountContext,
}

/// Raw exchange with the decision function, kept for the audit trail.
#[derive(Debug, Clone)]
pub struct DecisionExchange {
    pub prompt: String,
    pub response: String,
}

/// Opaque decision function. Returns the unparsed response text; parsing and
/// validation belong to the engine.
#[async_trait]
pub trait DecisionMaker: Send + Sync {
    async fn decide(&self, request: &DecisionRequest) -> Result<DecisionExchange, DecisionError>;
}

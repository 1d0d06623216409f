use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::entities::agent::AgentId;

/// Input that failed validation before touching the ledger.
///
/// Always non-fatal: surfaced as the result of the instrument it concerns.
#[derive(Debug, Error, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum ValidationError {
    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error("Invalid leverage: must be 1-20, got {0}")]
    InvalidLeverage(i64),

    #[error("Invalid leverage: {0}")]
    UnparsableLeverage(String),

    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    #[error("Unknown signal: {0}")]
    UnknownSignal(String),

    #[error("Unknown instrument: {0}")]
    UnknownInstrument(String),

    #[error("Value must be finite")]
    MustBeFinite,
}

/// Per-instrument failure. Recorded in the cycle result, never propagated.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum OrderError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Insufficient cash: need ${required:.2}, have ${available:.2}")]
    InsufficientCash { required: f64, available: f64 },

    #[error("No position to close")]
    NothingToClose,

    #[error("Market data not available for {0}")]
    MissingQuote(String),
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Agent not found: {0}")]
    AgentNotFound(AgentId),

    #[error("Database connection error: {0}")]
    Connection(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Query error: {0}")]
    Query(String),
}

#[derive(Debug, Error, Clone)]
pub enum QuoteError {
    #[error("Quote source error: {0}")]
    Source(String),

    #[error("Market data unavailable (primary: {primary}; secondary: {secondary})")]
    MarketDataUnavailable { primary: String, secondary: String },
}

#[derive(Debug, Error, Clone)]
pub enum DecisionError {
    #[error("Decision request failed: {0}")]
    Request(String),

    #[error("Malformed decision response: {0}")]
    Malformed(String),
}

/// Conditions that abort a whole agent cycle. The scheduler logs them and the
/// agent is retried on the next tick.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    MarketData(#[from] QuoteError),

    #[error(transparent)]
    Decision(#[from] DecisionError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Cycle already in progress for agent {0}")]
    CycleInProgress(AgentId),
}

/// Failures in the scheduler's own bookkeeping, distinct from agent failures.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Failed to read settings: {0}")]
    Settings(LedgerError),
}

/// A market history snapshot that could not be taken or stored. The collector
/// logs it and tries again on its next run.
#[derive(Debug, Error)]
pub enum CollectorError {
    #[error(transparent)]
    MarketData(#[from] QuoteError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

impl From<ValidationError> for String {
    fn from(error: ValidationError) -> Self {
        error.to_string()
    }
}

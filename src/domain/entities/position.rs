use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::entities::agent::AgentId;
use crate::domain::errors::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSide::Long => "long",
            PositionSide::Short => "short",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ValidationError> {
        match value.trim().to_lowercase().as_str() {
            "long" => Ok(PositionSide::Long),
            "short" => Ok(PositionSide::Short),
            other => Err(ValidationError::UnknownSignal(format!(
                "unknown side '{}'",
                other
            ))),
        }
    }

    /// Gross PnL of moving from `entry` to `exit` on `quantity` units.
    pub fn gross_pnl(&self, entry: f64, exit: f64, quantity: f64) -> f64 {
        match self {
            PositionSide::Long => (exit - entry) * quantity,
            PositionSide::Short => (entry - exit) * quantity,
        }
    }
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Open exposure keyed by (agent, instrument, side). Removed from the ledger
/// when closed rather than zeroed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Position {
    pub agent_id: AgentId,
    pub instrument: String,
    pub side: PositionSide,
    pub quantity: f64,
    pub avg_price: f64,
    pub leverage: i64,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    pub fn notional(&self) -> f64 {
        self.quantity * self.avg_price
    }

    /// Capital reserved against this position.
    pub fn margin(&self) -> f64 {
        self.notional() / self.leverage as f64
    }

    pub fn unrealized_pnl(&self, current_price: f64) -> f64 {
        self.side
            .gross_pnl(self.avg_price, current_price, self.quantity)
    }
}

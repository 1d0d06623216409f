use serde::Serialize;

use crate::domain::entities::agent::AgentId;
use crate::domain::entities::position::Position;

/// An open position valued against the current quote, if one exists.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionView {
    #[serde(flatten)]
    pub position: Position,
    pub current_price: Option<f64>,
    pub pnl: f64,
}

/// Derived account state. Computed per request, never persisted as such.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioView {
    pub agent_id: AgentId,
    pub initial_capital: f64,
    pub cash: f64,
    pub positions: Vec<PositionView>,
    pub positions_value: f64,
    pub margin_used: f64,
    pub total_value: f64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub total_fees: f64,
}

impl PortfolioView {
    /// Return on initial capital, in percent.
    pub fn total_return_pct(&self) -> f64 {
        if self.initial_capital == 0.0 {
            return 0.0;
        }
        (self.total_value - self.initial_capital) / self.initial_capital * 100.0
    }

    /// First open position on `instrument`, whatever its side.
    pub fn position_for(&self, instrument: &str) -> Option<&PositionView> {
        self.positions
            .iter()
            .find(|view| view.position.instrument == instrument)
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::entities::agent::AgentId;
use crate::domain::entities::position::PositionSide;

/// Action requested for one instrument by the decision function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalKind {
    #[serde(rename = "buy_to_enter")]
    OpenLong,
    #[serde(rename = "sell_to_enter")]
    OpenShort,
    #[serde(rename = "close_position")]
    Close,
    #[serde(rename = "hold")]
    Hold,
}

impl SignalKind {
    /// Wire name used in prompts and trade records.
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::OpenLong => "buy_to_enter",
            SignalKind::OpenShort => "sell_to_enter",
            SignalKind::Close => "close_position",
            SignalKind::Hold => "hold",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "buy_to_enter" | "open-long" | "open_long" => Some(SignalKind::OpenLong),
            "sell_to_enter" | "open-short" | "open_short" => Some(SignalKind::OpenShort),
            "close_position" | "close" => Some(SignalKind::Close),
            "hold" => Some(SignalKind::Hold),
            _ => None,
        }
    }

    /// Side of the position an open signal creates.
    pub fn open_side(&self) -> Option<PositionSide> {
        match self {
            SignalKind::OpenLong => Some(PositionSide::Long),
            SignalKind::OpenShort => Some(PositionSide::Short),
            _ => None,
        }
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Append-only fill record. Summing `pnl` and `fee` over an agent's rows gives
/// its realized PnL and total fees.
#[derive(Debug, Clone, Serialize)]
pub struct TradeRecord {
    pub id: i64,
    pub agent_id: AgentId,
    pub instrument: String,
    pub signal: SignalKind,
    pub quantity: f64,
    pub price: f64,
    pub leverage: i64,
    pub side: PositionSide,
    pub pnl: f64,
    pub fee: f64,
    pub executed_at: DateTime<Utc>,
}

/// Fill to be appended to the trade log.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTrade {
    pub instrument: String,
    pub signal: SignalKind,
    pub quantity: f64,
    pub price: f64,
    pub leverage: i64,
    pub side: PositionSide,
    pub pnl: f64,
    pub fee: f64,
}

/// Per-cycle account valuation kept for charting.
#[derive(Debug, Clone, Serialize)]
pub struct AccountSnapshot {
    pub id: i64,
    pub agent_id: AgentId,
    pub total_value: f64,
    pub cash: f64,
    pub positions_value: f64,
    pub recorded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_parse_wire_names_and_aliases() {
        assert_eq!(SignalKind::parse("buy_to_enter"), Some(SignalKind::OpenLong));
        assert_eq!(SignalKind::parse("open-long"), Some(SignalKind::OpenLong));
        assert_eq!(SignalKind::parse("SELL_TO_ENTER"), Some(SignalKind::OpenShort));
        assert_eq!(SignalKind::parse("open_short"), Some(SignalKind::OpenShort));
        assert_eq!(SignalKind::parse("close"), Some(SignalKind::Close));
        assert_eq!(SignalKind::parse(" hold "), Some(SignalKind::Hold));
        assert_eq!(SignalKind::parse("moon"), None);
    }

    #[test]
    fn test_signal_round_trips_through_wire_name() {
        for kind in [
            SignalKind::OpenLong,
            SignalKind::OpenShort,
            SignalKind::Close,
            SignalKind::Hold,
        ] {
            assert_eq!(SignalKind::parse(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn test_open_side() {
        assert_eq!(SignalKind::OpenLong.open_side(), Some(PositionSide::Long));
        assert_eq!(SignalKind::OpenShort.open_side(), Some(PositionSide::Short));
        assert_eq!(SignalKind::Close.open_side(), None);
    }
}

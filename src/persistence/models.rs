//! Database Models
//!
//! Row shapes for the ledger tables and their conversion into domain entities.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use zeroize::Zeroizing;

use crate::domain::entities::agent::{Agent, ProviderBinding};
use crate::domain::entities::position::{Position, PositionSide};
use crate::domain::entities::quote::PriceBar;
use crate::domain::entities::settings::Settings;
use crate::domain::entities::trade::{AccountSnapshot, SignalKind, TradeRecord};
use crate::domain::errors::LedgerError;

/// Agent joined with its provider binding
#[derive(Debug, Clone, FromRow)]
pub struct AgentRow {
    pub id: i64,
    pub name: String,
    pub model_name: String,
    pub initial_capital: f64,
    pub created_at: DateTime<Utc>,
    pub provider_id: i64,
    pub api_url: String,
    pub api_key: String,
}

impl From<AgentRow> for Agent {
    fn from(row: AgentRow) -> Self {
        Agent {
            id: row.id,
            name: row.name,
            model_name: row.model_name,
            provider: ProviderBinding {
                provider_id: row.provider_id,
                api_url: row.api_url,
                api_key: Zeroizing::new(row.api_key),
            },
            initial_capital: row.initial_capital,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct PositionRow {
    pub id: i64,
    pub agent_id: i64,
    pub instrument: String,
    pub side: String,
    pub quantity: f64,
    pub avg_price: f64,
    pub leverage: i64,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<PositionRow> for Position {
    type Error = LedgerError;

    fn try_from(row: PositionRow) -> Result<Self, Self::Error> {
        let side = PositionSide::parse(&row.side)
            .map_err(|e| LedgerError::Query(format!("position {}: {}", row.id, e)))?;
        Ok(Position {
            agent_id: row.agent_id,
            instrument: row.instrument,
            side,
            quantity: row.quantity,
            avg_price: row.avg_price,
            leverage: row.leverage,
            updated_at: row.updated_at,
        })
    }
}

/// Capital plus trade-log aggregates for one agent
#[derive(Debug, Clone, FromRow)]
pub struct LedgerTotalsRow {
    pub initial_capital: f64,
    pub realized_pnl: f64,
    pub total_fees: f64,
}

#[derive(Debug, Clone, FromRow)]
pub struct TradeRow {
    pub id: i64,
    pub agent_id: i64,
    pub instrument: String,
    pub signal: String,
    pub quantity: f64,
    pub price: f64,
    pub leverage: i64,
    pub side: String,
    pub pnl: f64,
    pub fee: f64,
    pub executed_at: DateTime<Utc>,
}

impl TryFrom<TradeRow> for TradeRecord {
    type Error = LedgerError;

    fn try_from(row: TradeRow) -> Result<Self, Self::Error> {
        let signal = SignalKind::parse(&row.signal).ok_or_else(|| {
            LedgerError::Query(format!("trade {}: unknown signal '{}'", row.id, row.signal))
        })?;
        let side = PositionSide::parse(&row.side)
            .map_err(|e| LedgerError::Query(format!("trade {}: {}", row.id, e)))?;
        Ok(TradeRecord {
            id: row.id,
            agent_id: row.agent_id,
            instrument: row.instrument,
            signal,
            quantity: row.quantity,
            price: row.price,
            leverage: row.leverage,
            side,
            pnl: row.pnl,
            fee: row.fee,
            executed_at: row.executed_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct SnapshotRow {
    pub id: i64,
    pub agent_id: i64,
    pub total_value: f64,
    pub cash: f64,
    pub positions_value: f64,
    pub recorded_at: DateTime<Utc>,
}

impl From<SnapshotRow> for AccountSnapshot {
    fn from(row: SnapshotRow) -> Self {
        AccountSnapshot {
            id: row.id,
            agent_id: row.agent_id,
            total_value: row.total_value,
            cash: row.cash,
            positions_value: row.positions_value,
            recorded_at: row.recorded_at,
        }
    }
}

/// Stored decision exchange
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ConversationRecord {
    pub id: i64,
    pub agent_id: i64,
    pub user_prompt: String,
    pub ai_response: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct SettingsRow {
    pub cycle_interval_minutes: i64,
    pub fee_rate: f64,
    pub max_concurrency: i64,
    pub per_agent_timeout_seconds: i64,
}

impl From<SettingsRow> for Settings {
    fn from(row: SettingsRow) -> Self {
        Settings {
            cycle_interval_minutes: row.cycle_interval_minutes,
            fee_rate: row.fee_rate,
            max_concurrency: row.max_concurrency.max(1) as usize,
            per_agent_timeout_seconds: row.per_agent_timeout_seconds.max(1) as u64,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct MarketPriceRow {
    pub instrument: String,
    pub resolution: i64,
    pub ts: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub source: String,
}

impl From<MarketPriceRow> for PriceBar {
    fn from(row: MarketPriceRow) -> Self {
        PriceBar {
            instrument: row.instrument,
            resolution_seconds: row.resolution,
            timestamp: row.ts,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume,
            source: row.source,
        }
    }
}

/// Create provider input
#[derive(Debug, Clone)]
pub struct CreateProvider {
    pub name: String,
    pub api_url: String,
    pub api_key: String,
}

/// Create agent input
#[derive(Debug, Clone)]
pub struct CreateAgent {
    pub name: String,
    pub provider_id: i64,
    pub model_name: String,
    pub initial_capital: f64,
}

//! Ledger trait
//!
//! Capability set the execution core needs from durable storage. Each call is
//! individually atomic; no cross-agent locking is expected since agents never
//! share positions.

use async_trait::async_trait;

use crate::domain::entities::agent::{Agent, AgentId};
use crate::domain::entities::portfolio::PortfolioView;
use crate::domain::entities::position::PositionSide;
use crate::domain::entities::quote::{PriceBar, PriceMap};
use crate::domain::entities::settings::Settings;
use crate::domain::entities::trade::NewTrade;
use crate::domain::errors::LedgerError;

pub type LedgerResult<T> = Result<T, LedgerError>;

#[async_trait]
pub trait Ledger: Send + Sync {
    async fn get_agent(&self, agent_id: AgentId) -> LedgerResult<Agent>;

    async fn list_agents(&self) -> LedgerResult<Vec<Agent>>;

    /// Portfolio valued against `current_prices`. Positions without a price
    /// contribute no unrealized PnL.
    async fn get_portfolio(
        &self,
        agent_id: AgentId,
        current_prices: &PriceMap,
    ) -> LedgerResult<PortfolioView>;

    /// Creates the position or replaces quantity, average price and leverage
    /// of the existing one with the same (agent, instrument, side).
    async fn upsert_position(
        &self,
        agent_id: AgentId,
        instrument: &str,
        side: PositionSide,
        quantity: f64,
        avg_price: f64,
        leverage: i64,
    ) -> LedgerResult<()>;

    /// Deletes the position row. Closing a missing position is a no-op.
    async fn close_position(
        &self,
        agent_id: AgentId,
        instrument: &str,
        side: PositionSide,
    ) -> LedgerResult<()>;

    async fn append_trade(&self, agent_id: AgentId, trade: NewTrade) -> LedgerResult<i64>;

    async fn record_snapshot(
        &self,
        agent_id: AgentId,
        total_value: f64,
        cash: f64,
        positions_value: f64,
    ) -> LedgerResult<()>;

    /// Audit record of one decision exchange.
    async fn record_conversation(
        &self,
        agent_id: AgentId,
        prompt: &str,
        response: &str,
    ) -> LedgerResult<()>;

    async fn get_settings(&self) -> LedgerResult<Settings>;

    /// Stores market history rows. A row with the same (instrument,
    /// resolution, timestamp) replaces the stored one. Returns rows written.
    async fn record_market_prices(&self, bars: &[PriceBar]) -> LedgerResult<usize>;

    /// Latest `limit` rows for one instrument and resolution, oldest first.
    async fn market_history(
        &self,
        instrument: &str,
        resolution_seconds: i64,
        limit: i64,
    ) -> LedgerResult<Vec<PriceBar>>;
}

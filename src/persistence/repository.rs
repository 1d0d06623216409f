//! Database Repository
//!
//! `SqliteLedger` implements the `Ledger` capability set on top of the pool,
//! plus the bootstrap and read helpers used by `main` and the status endpoint.

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error};

use super::models::*;
use super::DbPool;
use crate::domain::entities::agent::{Agent, AgentId};
use crate::domain::entities::portfolio::PortfolioView;
use crate::domain::entities::position::{Position, PositionSide};
use crate::domain::entities::quote::{PriceBar, PriceMap};
use crate::domain::entities::settings::Settings;
use crate::domain::entities::trade::{AccountSnapshot, NewTrade, TradeRecord};
use crate::domain::errors::LedgerError;
use crate::domain::repositories::ledger::{Ledger, LedgerResult};
use crate::domain::services::portfolio::{compute_portfolio, LedgerTotals};

const AGENT_SELECT: &str = r#"
    SELECT a.id, a.name, a.model_name, a.initial_capital, a.created_at,
           p.id AS provider_id, p.api_url, p.api_key
    FROM agents a
    JOIN providers p ON p.id = a.provider_id
"#;

fn query_error(context: &str, e: sqlx::Error) -> LedgerError {
    error!("{}: {}", context, e);
    LedgerError::Query(format!("{}: {}", context, e))
}

#[derive(Clone)]
pub struct SqliteLedger {
    pool: DbPool,
}

impl SqliteLedger {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub async fn create_provider(&self, provider: CreateProvider) -> LedgerResult<i64> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO providers (name, api_url, api_key, created_at)
            VALUES (?1, ?2, ?3, ?4)
            RETURNING id
            "#,
        )
        .bind(&provider.name)
        .bind(&provider.api_url)
        .bind(&provider.api_key)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| query_error("Failed to create provider", e))?;

        debug!("Created provider {} ({})", id, provider.name);
        Ok(id)
    }

    pub async fn create_agent(&self, agent: CreateAgent) -> LedgerResult<AgentId> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO agents (name, provider_id, model_name, initial_capital, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            RETURNING id
            "#,
        )
        .bind(&agent.name)
        .bind(agent.provider_id)
        .bind(&agent.model_name)
        .bind(agent.initial_capital)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| query_error("Failed to create agent", e))?;

        debug!("Created agent {} ({})", id, agent.name);
        Ok(id)
    }

    /// Writes the defaults only when no settings row exists yet.
    pub async fn seed_settings(&self, defaults: &Settings) -> LedgerResult<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO settings (
                id, cycle_interval_minutes, fee_rate, max_concurrency,
                per_agent_timeout_seconds, updated_at
            )
            VALUES (1, ?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(defaults.cycle_interval_minutes)
        .bind(defaults.fee_rate)
        .bind(defaults.max_concurrency as i64)
        .bind(defaults.per_agent_timeout_seconds as i64)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| query_error("Failed to seed settings", e))?;
        Ok(())
    }

    pub async fn update_settings(&self, settings: &Settings) -> LedgerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (
                id, cycle_interval_minutes, fee_rate, max_concurrency,
                per_agent_timeout_seconds, updated_at
            )
            VALUES (1, ?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                cycle_interval_minutes = excluded.cycle_interval_minutes,
                fee_rate = excluded.fee_rate,
                max_concurrency = excluded.max_concurrency,
                per_agent_timeout_seconds = excluded.per_agent_timeout_seconds,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(settings.cycle_interval_minutes)
        .bind(settings.fee_rate)
        .bind(settings.max_concurrency as i64)
        .bind(settings.per_agent_timeout_seconds as i64)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| query_error("Failed to update settings", e))?;

        debug!("Updated settings: {:?}", settings);
        Ok(())
    }

    pub async fn open_positions(&self, agent_id: AgentId) -> LedgerResult<Vec<Position>> {
        let rows = sqlx::query_as::<_, PositionRow>(
            r#"
            SELECT id, agent_id, instrument, side, quantity, avg_price, leverage, updated_at
            FROM positions
            WHERE agent_id = ?1 AND quantity > 0
            ORDER BY id
            "#,
        )
        .bind(agent_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_error("Failed to get positions", e))?;

        rows.into_iter().map(Position::try_from).collect()
    }

    /// Most recent trades first
    pub async fn recent_trades(
        &self,
        agent_id: AgentId,
        limit: i64,
    ) -> LedgerResult<Vec<TradeRecord>> {
        let rows = sqlx::query_as::<_, TradeRow>(
            r#"
            SELECT id, agent_id, instrument, signal, quantity, price, leverage,
                   side, pnl, fee, executed_at
            FROM trades
            WHERE agent_id = ?1
            ORDER BY id DESC
            LIMIT ?2
            "#,
        )
        .bind(agent_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_error("Failed to get trades", e))?;

        rows.into_iter().map(TradeRecord::try_from).collect()
    }

    /// Oldest first, so the result can be charted directly
    pub async fn snapshot_history(
        &self,
        agent_id: AgentId,
        limit: i64,
    ) -> LedgerResult<Vec<AccountSnapshot>> {
        let mut rows = sqlx::query_as::<_, SnapshotRow>(
            r#"
            SELECT id, agent_id, total_value, cash, positions_value, recorded_at
            FROM account_snapshots
            WHERE agent_id = ?1
            ORDER BY id DESC
            LIMIT ?2
            "#,
        )
        .bind(agent_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_error("Failed to get snapshots", e))?;

        rows.reverse();
        Ok(rows.into_iter().map(AccountSnapshot::from).collect())
    }

    /// Most recent first
    pub async fn recent_conversations(
        &self,
        agent_id: AgentId,
        limit: i64,
    ) -> LedgerResult<Vec<ConversationRecord>> {
        sqlx::query_as::<_, ConversationRecord>(
            r#"
            SELECT id, agent_id, user_prompt, ai_response, created_at
            FROM conversations
            WHERE agent_id = ?1
            ORDER BY id DESC
            LIMIT ?2
            "#,
        )
        .bind(agent_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_error("Failed to get conversations", e))
    }
}

#[async_trait]
impl Ledger for SqliteLedger {
    async fn get_agent(&self, agent_id: AgentId) -> LedgerResult<Agent> {
        let sql = format!("{} WHERE a.id = ?1", AGENT_SELECT);
        let row = sqlx::query_as::<_, AgentRow>(&sql)
            .bind(agent_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| query_error("Failed to get agent", e))?;

        row.map(Agent::from)
            .ok_or(LedgerError::AgentNotFound(agent_id))
    }

    async fn list_agents(&self) -> LedgerResult<Vec<Agent>> {
        let sql = format!("{} ORDER BY a.id", AGENT_SELECT);
        let rows = sqlx::query_as::<_, AgentRow>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| query_error("Failed to list agents", e))?;

        Ok(rows.into_iter().map(Agent::from).collect())
    }

    async fn get_portfolio(
        &self,
        agent_id: AgentId,
        current_prices: &PriceMap,
    ) -> LedgerResult<PortfolioView> {
        let totals = sqlx::query_as::<_, LedgerTotalsRow>(
            r#"
            SELECT a.initial_capital AS initial_capital,
                   COALESCE(SUM(t.pnl), 0.0) AS realized_pnl,
                   COALESCE(SUM(t.fee), 0.0) AS total_fees
            FROM agents a
            LEFT JOIN trades t ON t.agent_id = a.id
            WHERE a.id = ?1
            GROUP BY a.id
            "#,
        )
        .bind(agent_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_error("Failed to get portfolio totals", e))?
        .ok_or(LedgerError::AgentNotFound(agent_id))?;

        let positions = self.open_positions(agent_id).await?;

        Ok(compute_portfolio(
            agent_id,
            LedgerTotals {
                initial_capital: totals.initial_capital,
                realized_pnl: totals.realized_pnl,
                total_fees: totals.total_fees,
            },
            positions,
            current_prices,
        ))
    }

    async fn upsert_position(
        &self,
        agent_id: AgentId,
        instrument: &str,
        side: PositionSide,
        quantity: f64,
        avg_price: f64,
        leverage: i64,
    ) -> LedgerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO positions (agent_id, instrument, side, quantity, avg_price, leverage, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(agent_id, instrument, side) DO UPDATE SET
                quantity = excluded.quantity,
                avg_price = excluded.avg_price,
                leverage = excluded.leverage,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(agent_id)
        .bind(instrument)
        .bind(side.as_str())
        .bind(quantity)
        .bind(avg_price)
        .bind(leverage)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| query_error("Failed to upsert position", e))?;

        debug!(
            "Upserted {} {} position for agent {}",
            side, instrument, agent_id
        );
        Ok(())
    }

    async fn close_position(
        &self,
        agent_id: AgentId,
        instrument: &str,
        side: PositionSide,
    ) -> LedgerResult<()> {
        sqlx::query("DELETE FROM positions WHERE agent_id = ?1 AND instrument = ?2 AND side = ?3")
            .bind(agent_id)
            .bind(instrument)
            .bind(side.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| query_error("Failed to close position", e))?;

        debug!("Closed {} {} position for agent {}", side, instrument, agent_id);
        Ok(())
    }

    async fn append_trade(&self, agent_id: AgentId, trade: NewTrade) -> LedgerResult<i64> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO trades (
                agent_id, instrument, signal, quantity, price, leverage,
                side, pnl, fee, executed_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            RETURNING id
            "#,
        )
        .bind(agent_id)
        .bind(&trade.instrument)
        .bind(trade.signal.as_str())
        .bind(trade.quantity)
        .bind(trade.price)
        .bind(trade.leverage)
        .bind(trade.side.as_str())
        .bind(trade.pnl)
        .bind(trade.fee)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| query_error("Failed to append trade", e))?;

        debug!("Appended trade {} for agent {}", id, agent_id);
        Ok(id)
    }

    async fn record_snapshot(
        &self,
        agent_id: AgentId,
        total_value: f64,
        cash: f64,
        positions_value: f64,
    ) -> LedgerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO account_snapshots (agent_id, total_value, cash, positions_value, recorded_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(agent_id)
        .bind(total_value)
        .bind(cash)
        .bind(positions_value)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| query_error("Failed to record snapshot", e))?;
        Ok(())
    }

    async fn record_conversation(
        &self,
        agent_id: AgentId,
        prompt: &str,
        response: &str,
    ) -> LedgerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO conversations (agent_id, user_prompt, ai_response, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(agent_id)
        .bind(prompt)
        .bind(response)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| query_error("Failed to record conversation", e))?;
        Ok(())
    }

    async fn get_settings(&self) -> LedgerResult<Settings> {
        let row = sqlx::query_as::<_, SettingsRow>(
            r#"
            SELECT cycle_interval_minutes, fee_rate, max_concurrency, per_agent_timeout_seconds
            FROM settings
            WHERE id = 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_error("Failed to get settings", e))?;

        Ok(row.map(Settings::from).unwrap_or_default())
    }

    async fn record_market_prices(&self, bars: &[PriceBar]) -> LedgerResult<usize> {
        if bars.is_empty() {
            return Ok(0);
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| query_error("Failed to begin market price batch", e))?;
        let now = Utc::now();
        for bar in bars {
            sqlx::query(
                r#"
                INSERT INTO market_prices (
                    instrument, resolution, ts, open, high, low, close,
                    volume, source, created_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                ON CONFLICT(instrument, resolution, ts) DO UPDATE SET
                    open = excluded.open,
                    high = excluded.high,
                    low = excluded.low,
                    close = excluded.close,
                    volume = excluded.volume,
                    source = excluded.source,
                    created_at = excluded.created_at
                "#,
            )
            .bind(&bar.instrument)
            .bind(bar.resolution_seconds)
            .bind(bar.timestamp)
            .bind(bar.open)
            .bind(bar.high)
            .bind(bar.low)
            .bind(bar.close)
            .bind(bar.volume)
            .bind(&bar.source)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| query_error("Failed to record market price", e))?;
        }
        tx.commit()
            .await
            .map_err(|e| query_error("Failed to commit market prices", e))?;

        debug!("Recorded {} market price rows", bars.len());
        Ok(bars.len())
    }

    async fn market_history(
        &self,
        instrument: &str,
        resolution_seconds: i64,
        limit: i64,
    ) -> LedgerResult<Vec<PriceBar>> {
        let mut rows = sqlx::query_as::<_, MarketPriceRow>(
            r#"
            SELECT instrument, resolution, ts, open, high, low, close, volume, source
            FROM market_prices
            WHERE instrument = ?1 AND resolution = ?2
            ORDER BY ts DESC
            LIMIT ?3
            "#,
        )
        .bind(instrument)
        .bind(resolution_seconds)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_error("Failed to get market history", e))?;

        rows.reverse();
        Ok(rows.into_iter().map(PriceBar::from).collect())
    }
}

//! Portfolio valuation
//!
//! Derives the account view from open positions and the aggregated trade log.
//! Shared by every ledger implementation so the arithmetic lives in one place.
//!
//! Also combines every agent's view into one arena-wide portfolio and ranks
//! agents by return.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::domain::entities::agent::AgentId;
use crate::domain::entities::portfolio::{PortfolioView, PositionView};
use crate::domain::entities::position::{Position, PositionSide};
use crate::domain::entities::quote::PriceMap;
use crate::domain::repositories::ledger::{Ledger, LedgerResult};

/// Trade-log aggregates for one agent.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LedgerTotals {
    pub initial_capital: f64,
    pub realized_pnl: f64,
    pub total_fees: f64,
}

pub fn compute_portfolio(
    agent_id: AgentId,
    totals: LedgerTotals,
    positions: Vec<Position>,
    current_prices: &PriceMap,
) -> PortfolioView {
    let mut margin_used = 0.0;
    let mut unrealized_pnl = 0.0;
    let mut positions_value = 0.0;
    let mut views = Vec::with_capacity(positions.len());

    for position in positions {
        margin_used += position.margin();

        let current_price = current_prices.get(&position.instrument).copied();
        let pnl = match current_price {
            Some(price) => {
                positions_value += position.quantity * price;
                position.unrealized_pnl(price)
            }
            None => {
                if current_prices.is_empty() {
                    positions_value += position.notional();
                }
                0.0
            }
        };
        unrealized_pnl += pnl;

        views.push(PositionView {
            position,
            current_price,
            pnl,
        });
    }

    let cash = totals.initial_capital + totals.realized_pnl - margin_used;
    let total_value = totals.initial_capital + totals.realized_pnl + unrealized_pnl;

    PortfolioView {
        agent_id,
        initial_capital: totals.initial_capital,
        cash,
        positions: views,
        positions_value,
        margin_used,
        total_value,
        realized_pnl: totals.realized_pnl,
        unrealized_pnl,
        total_fees: totals.total_fees,
    }
}

/// Positions of every agent on one (instrument, side), merged.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedPosition {
    pub instrument: String,
    pub side: PositionSide,
    pub quantity: f64,
    /// Quantity-weighted average entry price
    pub avg_price: f64,
    /// Leverage of the first merged position
    pub leverage: i64,
    pub current_price: Option<f64>,
    pub pnl: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregatedPortfolio {
    pub agent_count: usize,
    pub initial_capital: f64,
    pub cash: f64,
    pub positions_value: f64,
    pub margin_used: f64,
    pub total_value: f64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub total_fees: f64,
    pub positions: Vec<AggregatedPosition>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeaderboardEntry {
    pub agent_id: AgentId,
    pub name: String,
    pub model_name: String,
    pub initial_capital: f64,
    pub account_value: f64,
    pub return_pct: f64,
}

/// Sums account figures across `portfolios` and merges positions that share
/// instrument and side.
pub fn aggregate_portfolios(portfolios: &[PortfolioView]) -> AggregatedPortfolio {
    let mut aggregate = AggregatedPortfolio {
        agent_count: portfolios.len(),
        ..AggregatedPortfolio::default()
    };
    let mut merged: BTreeMap<(String, &'static str), AggregatedPosition> = BTreeMap::new();

    for portfolio in portfolios {
        aggregate.initial_capital += portfolio.initial_capital;
        aggregate.cash += portfolio.cash;
        aggregate.positions_value += portfolio.positions_value;
        aggregate.margin_used += portfolio.margin_used;
        aggregate.total_value += portfolio.total_value;
        aggregate.realized_pnl += portfolio.realized_pnl;
        aggregate.unrealized_pnl += portfolio.unrealized_pnl;
        aggregate.total_fees += portfolio.total_fees;

        for view in &portfolio.positions {
            let position = &view.position;
            let key = (position.instrument.clone(), position.side.as_str());
            match merged.get_mut(&key) {
                Some(entry) => {
                    let quantity = entry.quantity + position.quantity;
                    entry.avg_price = (entry.avg_price * entry.quantity
                        + position.avg_price * position.quantity)
                        / quantity;
                    entry.quantity = quantity;
                    if entry.current_price.is_none() {
                        entry.current_price = view.current_price;
                    }
                }
                None => {
                    merged.insert(
                        key,
                        AggregatedPosition {
                            instrument: position.instrument.clone(),
                            side: position.side,
                            quantity: position.quantity,
                            avg_price: position.avg_price,
                            leverage: position.leverage,
                            current_price: view.current_price,
                            pnl: 0.0,
                        },
                    );
                }
            }
        }
    }

    aggregate.positions = merged
        .into_values()
        .map(|mut entry| {
            entry.pnl = entry.current_price.map_or(0.0, |price| {
                entry.side.gross_pnl(entry.avg_price, price, entry.quantity)
            });
            entry
        })
        .collect();
    aggregate
}

/// Sorts by return, best first. Ties keep the lower agent id first.
pub fn rank_agents(mut entries: Vec<LeaderboardEntry>) -> Vec<LeaderboardEntry> {
    entries.sort_by(|a, b| {
        b.return_pct
            .total_cmp(&a.return_pct)
            .then(a.agent_id.cmp(&b.agent_id))
    });
    entries
}

/// Every agent's portfolio valued at `current_prices`, combined.
pub async fn aggregated_portfolio(
    ledger: &dyn Ledger,
    current_prices: &PriceMap,
) -> LedgerResult<AggregatedPortfolio> {
    let mut portfolios = Vec::new();
    for agent in ledger.list_agents().await? {
        portfolios.push(ledger.get_portfolio(agent.id, current_prices).await?);
    }
    Ok(aggregate_portfolios(&portfolios))
}

pub async fn leaderboard(
    ledger: &dyn Ledger,
    current_prices: &PriceMap,
) -> LedgerResult<Vec<LeaderboardEntry>> {
    let mut entries = Vec::new();
    for agent in ledger.list_agents().await? {
        let portfolio = ledger.get_portfolio(agent.id, current_prices).await?;
        entries.push(LeaderboardEntry {
            agent_id: agent.id,
            name: agent.name,
            model_name: agent.model_name,
            initial_capital: portfolio.initial_capital,
            account_value: portfolio.total_value,
            return_pct: portfolio.total_return_pct(),
        });
    }
    Ok(rank_agents(entries))
}

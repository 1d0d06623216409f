//! ExecutionEngine - one agent's decision-to-ledger cycle
//!
//! A cycle pulls quotes and the portfolio, asks the decision function what to
//! do, applies the resulting orders in the order they were returned and writes
//! an account snapshot. Per-instrument problems become that instrument's
//! result; only market data, decision and ledger failures abort the cycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures_util::future::join_all;
use tracing::{debug, info, warn};

use crate::domain::entities::agent::AgentId;
use crate::domain::entities::portfolio::PortfolioView;
use crate::domain::entities::position::PositionSide;
use crate::domain::entities::quote::{prices_of, Indicators, MarketState, PriceMap, QuoteMap};
use crate::domain::entities::trade::{NewTrade, SignalKind};
use crate::domain::errors::{EngineError, LedgerError, OrderError, ValidationError};
use crate::domain::repositories::decision_maker::{
    AccountContext, DecisionMaker, DecisionRequest,
};
use crate::domain::repositories::ledger::Ledger;
use crate::domain::repositories::quote_source::HistorySource;
use crate::domain::services::decision::{parse_decisions, Decision};
use crate::domain::services::indicators::compute_indicators;
use crate::domain::services::quote_cache::QuoteCache;
use crate::domain::value_objects::leverage::Leverage;
use crate::domain::value_objects::price::Price;
use crate::domain::value_objects::quantity::Quantity;

/// Days of closes requested for indicator computation.
pub const INDICATOR_HISTORY_DAYS: u32 = 14;

type OrderOutcome = Result<String, OrderError>;

/// Outcome of one decision for one instrument.
#[derive(Debug, Clone)]
pub struct InstrumentResult {
    pub instrument: String,
    pub signal: String,
    pub outcome: OrderOutcome,
}

impl InstrumentResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub agent_id: AgentId,
    pub decisions: Vec<(String, Decision)>,
    pub results: Vec<InstrumentResult>,
    pub portfolio: PortfolioView,
}

impl CycleOutcome {
    pub fn result_for(&self, instrument: &str) -> Option<&InstrumentResult> {
        self.results.iter().find(|r| r.instrument == instrument)
    }
}

/// Marks a cycle as running until dropped.
struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightGuard(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct ExecutionEngine {
    agent_id: AgentId,
    instruments: Vec<String>,
    ledger: Arc<dyn Ledger>,
    quotes: Arc<QuoteCache>,
    decision_maker: Arc<dyn DecisionMaker>,
    history: Option<Arc<dyn HistorySource>>,
    in_flight: AtomicBool,
}

impl ExecutionEngine {
    pub fn new(
        agent_id: AgentId,
        instruments: Vec<String>,
        ledger: Arc<dyn Ledger>,
        quotes: Arc<QuoteCache>,
        decision_maker: Arc<dyn DecisionMaker>,
    ) -> Self {
        Self {
            agent_id,
            instruments,
            ledger,
            quotes,
            decision_maker,
            history: None,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Attach a price history source so decisions see technical indicators.
    pub fn with_history(mut self, history: Arc<dyn HistorySource>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn agent_id(&self) -> AgentId {
        self.agent_id
    }

    pub fn instruments(&self) -> &[String] {
        &self.instruments
    }

    pub fn is_running(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Runs one full cycle for this agent.
    pub async fn execute_cycle(&self) -> Result<CycleOutcome, EngineError> {
        let _guard = InFlightGuard::acquire(&self.in_flight)
            .ok_or(EngineError::CycleInProgress(self.agent_id))?;
        debug!(agent_id = self.agent_id, "Cycle started");

        let settings = self.ledger.get_settings().await?;
        let fee_rate = settings.effective_fee_rate();

        let quotes = self.quotes.get_quotes(&self.instruments).await?;
        let prices = prices_of(&quotes);
        let portfolio = self.ledger.get_portfolio(self.agent_id, &prices).await?;

        let request = DecisionRequest {
            market: self.market_state(&quotes).await,
            account: AccountContext {
                current_time: Utc::now(),
                total_return_pct: portfolio.total_return_pct(),
                initial_capital: portfolio.initial_capital,
            },
            portfolio,
        };

        let exchange = self.decision_maker.decide(&request).await?;
        let decisions = parse_decisions(&exchange.response)?;

        if let Err(e) = self
            .ledger
            .record_conversation(self.agent_id, &exchange.prompt, &exchange.response)
            .await
        {
            warn!(agent_id = self.agent_id, error = %e, "Failed to record decision audit");
        }

        let mut results = Vec::with_capacity(decisions.len());
        for (instrument, decision) in &decisions {
            if !self.instruments.iter().any(|i| i == instrument) {
                warn!(
                    agent_id = self.agent_id,
                    instrument = %instrument,
                    "Decision for instrument outside the trading universe, skipping"
                );
                continue;
            }

            let outcome = self
                .apply_decision(instrument, decision, fee_rate, &quotes, &prices)
                .await?;

            match &outcome {
                Ok(message) => info!(
                    agent_id = self.agent_id,
                    instrument = %instrument,
                    "{}",
                    message
                ),
                Err(e) => warn!(
                    agent_id = self.agent_id,
                    instrument = %instrument,
                    signal = %decision.signal,
                    error = %e,
                    "Order rejected"
                ),
            }

            results.push(InstrumentResult {
                instrument: instrument.clone(),
                signal: decision.signal.clone(),
                outcome,
            });
        }

        let portfolio = self.ledger.get_portfolio(self.agent_id, &prices).await?;
        self.ledger
            .record_snapshot(
                self.agent_id,
                portfolio.total_value,
                portfolio.cash,
                portfolio.positions_value,
            )
            .await?;

        debug!(
            agent_id = self.agent_id,
            total_value = portfolio.total_value,
            cash = portfolio.cash,
            "Cycle finished"
        );

        Ok(CycleOutcome {
            agent_id: self.agent_id,
            decisions,
            results,
            portfolio,
        })
    }

    /// Quotes plus indicators, in universe order. Indicator failures only
    /// drop the indicators.
    async fn market_state(&self, quotes: &QuoteMap) -> Vec<MarketState> {
        let quoted: Vec<&String> = self
            .instruments
            .iter()
            .filter(|i| quotes.contains_key(*i))
            .collect();

        let indicators: Vec<Option<Indicators>> = match &self.history {
            Some(history) => {
                join_all(quoted.iter().map(|instrument| async move {
                    match history
                        .daily_closes(instrument, INDICATOR_HISTORY_DAYS)
                        .await
                    {
                        Ok(closes) => compute_indicators(&closes),
                        Err(e) => {
                            warn!(instrument = %instrument, error = %e, "Indicator history unavailable");
                            None
                        }
                    }
                }))
                .await
            }
            None => vec![None; quoted.len()],
        };

        quoted
            .into_iter()
            .zip(indicators)
            .filter_map(|(instrument, indicators)| {
                quotes.get(instrument).map(|quote| MarketState {
                    quote: quote.clone(),
                    indicators,
                })
            })
            .collect()
    }

    async fn apply_decision(
        &self,
        instrument: &str,
        decision: &Decision,
        fee_rate: f64,
        quotes: &QuoteMap,
        prices: &PriceMap,
    ) -> Result<OrderOutcome, LedgerError> {
        match SignalKind::parse(&decision.signal) {
            Some(kind @ (SignalKind::OpenLong | SignalKind::OpenShort)) => {
                let side = match kind.open_side() {
                    Some(side) => side,
                    None => return Ok(Err(unknown_signal(decision))),
                };
                self.open_position(instrument, side, kind, decision, fee_rate, quotes, prices)
                    .await
            }
            Some(SignalKind::Close) => {
                self.close_position(instrument, fee_rate, quotes, prices)
                    .await
            }
            Some(SignalKind::Hold) => Ok(Ok(format!("Holding {}", instrument))),
            None => Ok(Err(unknown_signal(decision))),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn open_position(
        &self,
        instrument: &str,
        side: PositionSide,
        signal: SignalKind,
        decision: &Decision,
        fee_rate: f64,
        quotes: &QuoteMap,
        prices: &PriceMap,
    ) -> Result<OrderOutcome, LedgerError> {
        let quantity = match Quantity::from_json(decision.quantity.as_ref()) {
            Ok(quantity) => quantity.value(),
            Err(e) => return Ok(Err(e.into())),
        };
        let leverage = match Leverage::from_json(decision.leverage.as_ref()) {
            Ok(leverage) => leverage,
            Err(e) => return Ok(Err(e.into())),
        };
        let price = match quote_price(instrument, quotes) {
            Ok(price) => price,
            Err(e) => return Ok(Err(e)),
        };

        let notional = quantity * price;
        let fee = notional * fee_rate;
        let margin_required = notional / leverage.as_f64();

        let portfolio = self.ledger.get_portfolio(self.agent_id, prices).await?;
        if margin_required + fee > portfolio.cash {
            return Ok(Err(OrderError::InsufficientCash {
                required: margin_required + fee,
                available: portfolio.cash,
            }));
        }

        self.ledger
            .upsert_position(
                self.agent_id,
                instrument,
                side,
                quantity,
                price,
                leverage.value(),
            )
            .await?;
        self.ledger
            .append_trade(
                self.agent_id,
                NewTrade {
                    instrument: instrument.to_string(),
                    signal,
                    quantity,
                    price,
                    leverage: leverage.value(),
                    side,
                    pnl: -fee,
                    fee,
                },
            )
            .await?;

        Ok(Ok(format!(
            "Opened {} {:.4} {} @ ${:.2} ({}), fee ${:.2}",
            side, quantity, instrument, price, leverage, fee
        )))
    }

    async fn close_position(
        &self,
        instrument: &str,
        fee_rate: f64,
        quotes: &QuoteMap,
        prices: &PriceMap,
    ) -> Result<OrderOutcome, LedgerError> {
        let portfolio = self.ledger.get_portfolio(self.agent_id, prices).await?;
        let Some(view) = portfolio.position_for(instrument) else {
            return Ok(Err(OrderError::NothingToClose));
        };
        let position = view.position.clone();

        let exit_price = match quote_price(instrument, quotes) {
            Ok(price) => price,
            Err(e) => return Ok(Err(e)),
        };

        let gross = position
            .side
            .gross_pnl(position.avg_price, exit_price, position.quantity);
        let fee = position.quantity * exit_price * fee_rate;
        let net_pnl = gross - fee;

        self.ledger
            .close_position(self.agent_id, instrument, position.side)
            .await?;
        self.ledger
            .append_trade(
                self.agent_id,
                NewTrade {
                    instrument: instrument.to_string(),
                    signal: SignalKind::Close,
                    quantity: position.quantity,
                    price: exit_price,
                    leverage: position.leverage,
                    side: position.side,
                    pnl: net_pnl,
                    fee,
                },
            )
            .await?;

        Ok(Ok(format!(
            "Closed {} {:.4} {} @ ${:.2}, P&L ${:.2}",
            position.side, position.quantity, instrument, exit_price, net_pnl
        )))
    }
}

fn quote_price(instrument: &str, quotes: &QuoteMap) -> Result<f64, OrderError> {
    let quote = quotes
        .get(instrument)
        .ok_or_else(|| OrderError::MissingQuote(instrument.to_string()))?;
    Ok(Price::new(quote.price)?.value())
}

fn unknown_signal(decision: &Decision) -> OrderError {
    ValidationError::UnknownSignal(decision.signal.clone()).into()
}

//! Scheduler and agent registry end-to-end tests
//!
//! Real short sleeps against an in-memory ledger. Cycle intervals are at the
//! one-minute floor, so each test sees exactly one tick unless it stops the
//! scheduler first.

mod common;

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arena::application::agent_registry::{AgentRegistry, EngineFactory, LlmEngineFactory};
use arena::application::scheduler::{Scheduler, SchedulerConfig, SchedulerState};
use arena::backoff::BackoffConfig;
use arena::domain::entities::agent::{Agent, AgentId};
use arena::domain::entities::portfolio::PortfolioView;
use arena::domain::entities::position::PositionSide;
use arena::domain::entities::quote::{PriceBar, PriceMap};
use arena::domain::entities::settings::Settings;
use arena::domain::entities::trade::NewTrade;
use arena::domain::errors::{DecisionError, EngineError, LedgerError};
use arena::domain::repositories::decision_maker::{
    DecisionExchange, DecisionMaker, DecisionRequest,
};
use arena::domain::repositories::ledger::{Ledger, LedgerResult};
use arena::domain::services::execution_engine::ExecutionEngine;
use arena::domain::services::quote_cache::QuoteCache;
use arena::persistence::repository::SqliteLedger;
use async_trait::async_trait;
use common::*;

/// Registry entries in these tests are inserted by hand.
struct NoFactory;

impl EngineFactory for NoFactory {
    fn build(&self, agent: &Agent) -> Result<ExecutionEngine, EngineError> {
        Err(EngineError::Ledger(LedgerError::AgentNotFound(agent.id)))
    }
}

/// Records how many decisions run at the same time.
#[derive(Default)]
struct ConcurrencyGauge {
    current: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

#[async_trait]
impl DecisionMaker for ConcurrencyGauge {
    async fn decide(&self, _request: &DecisionRequest) -> Result<DecisionExchange, DecisionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(DecisionExchange {
            prompt: "gauge".to_string(),
            response: "{}".to_string(),
        })
    }
}

/// Decision function that panics inside the agent task.
struct PanickingDecisions;

#[async_trait]
impl DecisionMaker for PanickingDecisions {
    async fn decide(&self, _request: &DecisionRequest) -> Result<DecisionExchange, DecisionError> {
        panic!("decision backend crashed");
    }
}

/// Ledger whose settings read fails a fixed number of times, then recovers.
struct FlakySettings {
    inner: Arc<SqliteLedger>,
    failures_left: AtomicUsize,
}

impl FlakySettings {
    fn new(inner: Arc<SqliteLedger>, failures: usize) -> Self {
        Self {
            inner,
            failures_left: AtomicUsize::new(failures),
        }
    }
}

#[async_trait]
impl Ledger for FlakySettings {
    async fn get_agent(&self, agent_id: AgentId) -> LedgerResult<Agent> {
        self.inner.get_agent(agent_id).await
    }

    async fn list_agents(&self) -> LedgerResult<Vec<Agent>> {
        self.inner.list_agents().await
    }

    async fn get_portfolio(
        &self,
        agent_id: AgentId,
        current_prices: &PriceMap,
    ) -> LedgerResult<PortfolioView> {
        self.inner.get_portfolio(agent_id, current_prices).await
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
        self.inner
            .upsert_position(agent_id, instrument, side, quantity, avg_price, leverage)
            .await
    }

    async fn close_position(
        &self,
        agent_id: AgentId,
        instrument: &str,
        side: PositionSide,
    ) -> LedgerResult<()> {
        self.inner.close_position(agent_id, instrument, side).await
    }

    async fn append_trade(&self, agent_id: AgentId, trade: NewTrade) -> LedgerResult<i64> {
        self.inner.append_trade(agent_id, trade).await
    }

    async fn record_snapshot(
        &self,
        agent_id: AgentId,
        total_value: f64,
        cash: f64,
        positions_value: f64,
    ) -> LedgerResult<()> {
        self.inner
            .record_snapshot(agent_id, total_value, cash, positions_value)
            .await
    }

    async fn record_conversation(
        &self,
        agent_id: AgentId,
        prompt: &str,
        response: &str,
    ) -> LedgerResult<()> {
        self.inner.record_conversation(agent_id, prompt, response).await
    }

    async fn get_settings(&self) -> LedgerResult<Settings> {
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(LedgerError::Query("settings unavailable".to_string()));
        }
        self.inner.get_settings().await
    }

    async fn record_market_prices(&self, bars: &[PriceBar]) -> LedgerResult<usize> {
        self.inner.record_market_prices(bars).await
    }

    async fn market_history(
        &self,
        instrument: &str,
        resolution_seconds: i64,
        limit: i64,
    ) -> LedgerResult<Vec<PriceBar>> {
        self.inner
            .market_history(instrument, resolution_seconds, limit)
            .await
    }
}

struct Harness {
    ledger: Arc<SqliteLedger>,
    quotes: Arc<QuoteCache>,
    registry: Arc<AgentRegistry>,
    scheduler: Scheduler,
}

impl Harness {
    async fn new(settings: Settings, config: SchedulerConfig) -> Self {
        let ledger = setup_ledger().await;
        ledger.update_settings(&settings).await.unwrap();
        let dyn_ledger: Arc<dyn Ledger> = ledger.clone();
        let registry = Arc::new(AgentRegistry::new(dyn_ledger.clone(), Arc::new(NoFactory)));
        let scheduler = Scheduler::new(registry.clone(), dyn_ledger, config);
        let quotes = quote_cache(MockQuotes::with_prices(&[("BTC", 50_000.0)]));
        Self {
            ledger,
            quotes,
            registry,
            scheduler,
        }
    }

    async fn add_agent(&self, name: &str, decisions: Arc<dyn DecisionMaker>) -> i64 {
        let agent_id = create_agent(&self.ledger, name, 10_000.0).await;
        self.registry
            .insert(engine(
                agent_id,
                &["BTC"],
                self.ledger.clone(),
                self.quotes.clone(),
                decisions,
            ))
            .await;
        agent_id
    }
}

fn settings(max_concurrency: usize, per_agent_timeout_seconds: u64) -> Settings {
    Settings {
        cycle_interval_minutes: 1,
        fee_rate: 0.001,
        max_concurrency,
        per_agent_timeout_seconds,
    }
}

fn fast_config() -> SchedulerConfig {
    SchedulerConfig {
        idle_sleep: Duration::from_millis(50),
        backoff: BackoffConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
        },
    }
}

async fn wait_until<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..250 {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn test_stop_when_never_started() {
    let harness = Harness::new(settings(4, 300), fast_config()).await;
    assert_eq!(harness.scheduler.state(), SchedulerState::Stopped);
    assert!(harness.scheduler.stop(Duration::from_millis(10)).await);
}

#[tokio::test]
async fn test_idle_scheduler_runs_no_cycles_and_stops_promptly() {
    let harness = Harness::new(settings(4, 300), SchedulerConfig::default()).await;

    harness.scheduler.start().await;
    assert_eq!(harness.scheduler.state(), SchedulerState::Running);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(harness.scheduler.cycles_completed(), 0);
    // Idle sleep is 10s; the stop signal must cut it short.
    assert!(harness.scheduler.stop(Duration::from_secs(1)).await);
    assert_eq!(harness.scheduler.state(), SchedulerState::Stopped);
}

#[tokio::test]
async fn test_start_twice_is_noop() {
    let harness = Harness::new(settings(4, 300), fast_config()).await;

    harness.scheduler.start().await;
    harness.scheduler.start().await;
    assert!(harness.scheduler.is_running());

    assert!(harness.scheduler.stop(Duration::from_secs(1)).await);
    assert!(!harness.scheduler.is_running());
}

#[tokio::test]
async fn test_tick_runs_every_agent_and_reports() {
    let harness = Harness::new(settings(4, 300), fast_config()).await;
    let first = harness.add_agent("first", ScriptedDecisions::new(&[])).await;
    let second = harness.add_agent("second", ScriptedDecisions::new(&[])).await;

    harness.scheduler.start().await;
    let scheduler = &harness.scheduler;
    assert!(wait_until(move || async move { scheduler.cycles_completed() >= 1 }).await);

    let report = scheduler.last_report().await.unwrap();
    assert_eq!(report.cycle, 1);
    assert_eq!(report.agents, 2);
    assert_eq!(report.workers, 2);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 0);
    assert_eq!(report.timed_out, 0);
    assert!(!report.interrupted);

    for agent_id in [first, second] {
        let snapshots = harness.ledger.snapshot_history(agent_id, 10).await.unwrap();
        assert_eq!(snapshots.len(), 1);
    }

    // Sleeping out the one-minute interval; stop must interrupt it.
    assert!(scheduler.stop(Duration::from_secs(1)).await);
}

#[tokio::test]
async fn test_agent_failure_is_isolated() {
    let harness = Harness::new(settings(4, 300), fast_config()).await;
    let failing = Arc::new(FailingDecisions::default());
    harness.add_agent("broken", failing.clone()).await;
    let healthy = harness.add_agent("healthy", ScriptedDecisions::new(&[])).await;

    harness.scheduler.start().await;
    let scheduler = &harness.scheduler;
    assert!(wait_until(move || async move { scheduler.cycles_completed() >= 1 }).await);

    let report = scheduler.last_report().await.unwrap();
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(failing.calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        harness.ledger.snapshot_history(healthy, 10).await.unwrap().len(),
        1
    );
    // A failing agent is not a scheduler failure.
    assert_eq!(scheduler.current_backoff().await, Duration::from_millis(100));

    assert!(scheduler.stop(Duration::from_secs(1)).await);
}

#[tokio::test]
async fn test_slow_agent_times_out_without_blocking_others() {
    let harness = Harness::new(settings(4, 1), fast_config()).await;
    harness
        .add_agent("slow", ScriptedDecisions::slow(Duration::from_secs(3)))
        .await;
    harness.add_agent("fast", ScriptedDecisions::new(&[])).await;

    harness.scheduler.start().await;
    let scheduler = &harness.scheduler;
    assert!(wait_until(move || async move { scheduler.cycles_completed() >= 1 }).await);

    let report = scheduler.last_report().await.unwrap();
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.timed_out, 1);
    assert_eq!(report.failed, 0);

    assert!(scheduler.stop(Duration::from_secs(1)).await);
}

#[tokio::test]
async fn test_worker_bound_is_respected() {
    let harness = Harness::new(settings(2, 30), fast_config()).await;
    let gauge = Arc::new(ConcurrencyGauge::default());
    for name in ["a", "b", "c", "d", "e"] {
        harness.add_agent(name, gauge.clone()).await;
    }

    harness.scheduler.start().await;
    let scheduler = &harness.scheduler;
    assert!(wait_until(move || async move { scheduler.cycles_completed() >= 1 }).await);

    let report = scheduler.last_report().await.unwrap();
    assert_eq!(report.workers, 2);
    assert_eq!(report.succeeded, 5);
    assert_eq!(gauge.calls.load(Ordering::SeqCst), 5);
    assert!(gauge.peak.load(Ordering::SeqCst) <= 2);

    assert!(scheduler.stop(Duration::from_secs(1)).await);
}

#[tokio::test]
async fn test_stop_interrupts_in_flight_cycle() {
    let harness = Harness::new(settings(1, 300), fast_config()).await;
    let slow = ScriptedDecisions::slow(Duration::from_secs(2));
    let queued = ScriptedDecisions::new(&[]);
    harness.add_agent("slow", slow.clone()).await;
    let queued_id = harness.add_agent("queued", queued.clone()).await;

    harness.scheduler.start().await;
    let slow = slow.as_ref();
    assert!(wait_until(move || async move { slow.call_count() >= 1 }).await);
    assert_eq!(queued.call_count(), 0);

    // Zero grace: the loop cannot have exited yet.
    assert!(!harness.scheduler.stop(Duration::ZERO).await);
    assert!(harness.scheduler.stop(Duration::from_secs(1)).await);
    assert_eq!(harness.scheduler.state(), SchedulerState::Stopped);

    let report = harness.scheduler.last_report().await.unwrap();
    assert!(report.interrupted);
    assert_eq!(report.submitted, 2);
    assert_eq!(report.abandoned, 2);
    assert_eq!(report.timed_out, 0);
    assert_eq!(report.skipped, 0);
    assert_eq!(report.succeeded, 0);

    // The queued agent was already submitted, so it still runs once the
    // slow one frees the only worker.
    let queued = queued.as_ref();
    assert!(wait_until(move || async move { queued.call_count() == 1 }).await);
    let ledger = harness.ledger.as_ref();
    assert!(
        wait_until(move || async move {
            ledger.snapshot_history(queued_id, 10).await.unwrap().len() == 1
        })
        .await
    );
}

#[tokio::test]
async fn test_panicking_agent_counts_once() {
    let harness = Harness::new(settings(4, 1), fast_config()).await;
    harness.add_agent("crashes", Arc::new(PanickingDecisions)).await;
    harness
        .add_agent("slow", ScriptedDecisions::slow(Duration::from_secs(3)))
        .await;

    harness.scheduler.start().await;
    let scheduler = &harness.scheduler;
    assert!(wait_until(move || async move { scheduler.cycles_completed() >= 1 }).await);

    let report = scheduler.last_report().await.unwrap();
    assert_eq!(report.agents, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.timed_out, 1);
    assert_eq!(report.succeeded, 0);
    assert_eq!(
        report.succeeded + report.failed + report.timed_out + report.skipped + report.abandoned,
        report.agents
    );
    // A crashed agent is not a scheduler failure.
    assert_eq!(scheduler.current_backoff().await, Duration::from_millis(100));

    assert!(scheduler.stop(Duration::from_secs(1)).await);
}

#[tokio::test]
async fn test_settings_failure_backs_off() {
    let harness = Harness::new(settings(4, 300), fast_config()).await;
    harness.add_agent("orphan", ScriptedDecisions::new(&[])).await;
    harness.ledger.pool().close().await;

    harness.scheduler.start().await;
    let scheduler = &harness.scheduler;
    assert!(
        wait_until(move || async move { scheduler.current_backoff().await >= Duration::from_millis(400) })
            .await
    );
    assert_eq!(scheduler.cycles_completed(), 0);
    assert!(scheduler.last_report().await.is_none());
    // Capped at the configured maximum.
    assert!(scheduler.current_backoff().await <= Duration::from_secs(1));

    assert!(scheduler.stop(Duration::from_secs(1)).await);
}

#[tokio::test]
async fn test_backoff_doubles_then_resets_after_clean_tick() {
    let sqlite = setup_ledger().await;
    sqlite.update_settings(&settings(4, 300)).await.unwrap();
    let flaky: Arc<dyn Ledger> = Arc::new(FlakySettings::new(sqlite.clone(), 3));
    let registry = Arc::new(AgentRegistry::new(flaky.clone(), Arc::new(NoFactory)));
    let quotes = quote_cache(MockQuotes::with_prices(&[("BTC", 50_000.0)]));
    let agent_id = create_agent(&sqlite, "steady", 10_000.0).await;
    registry
        .insert(ExecutionEngine::new(
            agent_id,
            instruments(&["BTC"]),
            flaky.clone(),
            quotes,
            ScriptedDecisions::new(&[]),
        ))
        .await;

    let floor = Duration::from_millis(50);
    let scheduler = Scheduler::new(
        registry,
        flaky,
        SchedulerConfig {
            idle_sleep: Duration::from_millis(50),
            backoff: BackoffConfig {
                initial_delay: floor,
                max_delay: Duration::from_secs(1),
            },
        },
    );
    assert_eq!(scheduler.current_backoff().await, floor);

    scheduler.start().await;
    let mut observed = vec![floor];
    for _ in 0..400 {
        let current = scheduler.current_backoff().await;
        if observed.last() != Some(&current) {
            observed.push(current);
        }
        if scheduler.cycles_completed() >= 1 && current == floor {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let millis: Vec<u128> = observed.iter().map(Duration::as_millis).collect();
    assert_eq!(millis, vec![50, 100, 200, 400, 50]);
    assert_eq!(scheduler.cycles_completed(), 1);
    let report = scheduler.last_report().await.unwrap();
    assert_eq!(report.succeeded, 1);

    assert!(scheduler.stop(Duration::from_secs(1)).await);
}

#[tokio::test]
async fn test_registry_initialize_builds_engine_per_agent() {
    let ledger = setup_ledger().await;
    let alpha = create_agent(&ledger, "alpha", 10_000.0).await;
    let beta = create_agent(&ledger, "beta", 5_000.0).await;
    let dyn_ledger: Arc<dyn Ledger> = ledger.clone();
    let factory = Arc::new(LlmEngineFactory {
        ledger: dyn_ledger.clone(),
        quotes: quote_cache(MockQuotes::with_prices(&[("BTC", 50_000.0)])),
        history: None,
        instruments: instruments(&["BTC", "ETH"]),
        decision_timeout: Duration::from_secs(5),
    });
    let registry = AgentRegistry::new(dyn_ledger, factory);

    assert_eq!(registry.initialize().await.unwrap(), 2);
    let snapshot = registry.snapshot().await;
    assert_eq!(
        snapshot.iter().map(|(id, _)| *id).collect::<Vec<_>>(),
        vec![alpha, beta]
    );
    assert_eq!(snapshot[0].1.instruments().len(), 2);

    assert!(registry.remove(alpha).await);
    assert!(!registry.remove(alpha).await);
    assert_eq!(registry.len().await, 1);

    registry.register(alpha).await.unwrap();
    assert!(registry.get(alpha).await.is_some());
    assert!(matches!(
        registry.register(999).await,
        Err(EngineError::Ledger(LedgerError::AgentNotFound(999)))
    ));
}

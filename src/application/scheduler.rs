//! Scheduler - periodic concurrent execution of every agent's cycle
//!
//! States: `Stopped -> Running -> Stopping -> Stopped`. One background task
//! drives the loop. Each tick fans out into a fresh bounded set of agent tasks
//! sharing a single deadline. Every sleep and the deadline wait also watch the
//! stop signal, so shutdown never waits for a full interval.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, Mutex, RwLock, Semaphore};
use tokio::task::{self, JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::application::agent_registry::AgentRegistry;
use crate::backoff::{BackoffConfig, RetryBackoff};
use crate::domain::entities::agent::AgentId;
use crate::domain::errors::SchedulerError;
use crate::domain::repositories::ledger::Ledger;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Sleep while no agent is registered
    pub idle_sleep: Duration,
    pub backoff: BackoffConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            idle_sleep: Duration::from_secs(10),
            backoff: BackoffConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SchedulerState {
    Stopped,
    Running,
    Stopping,
}

/// Per-tick counts.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub agents: usize,
    pub workers: usize,
    pub submitted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub skipped: usize,
    /// Submitted agents left to finish in the background after a stop
    pub abandoned: usize,
    /// The stop signal cut the tick short
    pub interrupted: bool,
}

/// Clears the running flag when the loop exits, however it exits.
struct RunningGuard(Arc<Inner>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.running.store(false, Ordering::Release);
    }
}

struct TrackedTask {
    started: Arc<AtomicBool>,
}

struct Inner {
    registry: Arc<AgentRegistry>,
    ledger: Arc<dyn Ledger>,
    config: SchedulerConfig,
    stop_tx: watch::Sender<bool>,
    running: AtomicBool,
    backoff: Mutex<RetryBackoff>,
    cycles_completed: AtomicU64,
    last_report: RwLock<Option<CycleReport>>,
}

pub struct Scheduler {
    inner: Arc<Inner>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(
        registry: Arc<AgentRegistry>,
        ledger: Arc<dyn Ledger>,
        config: SchedulerConfig,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        let backoff = RetryBackoff::new(config.backoff.clone());
        Self {
            inner: Arc::new(Inner {
                registry,
                ledger,
                config,
                stop_tx,
                running: AtomicBool::new(false),
                backoff: Mutex::new(backoff),
                cycles_completed: AtomicU64::new(0),
                last_report: RwLock::new(None),
            }),
            handle: Mutex::new(None),
        }
    }

    /// Launches the driving loop. No-op while it is already running.
    pub async fn start(&self) {
        if self.inner.running.swap(true, Ordering::AcqRel) {
            warn!("Scheduler already running");
            return;
        }
        self.inner.stop_tx.send_replace(false);

        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            let guard = RunningGuard(inner);
            guard.0.clone().run_loop().await;
        });
        *self.handle.lock().await = Some(handle);
        info!("Scheduler started");
    }

    /// Raises the stop signal and waits up to `timeout` for the loop to exit.
    ///
    /// Returns `true` if the loop was not running or exited in time. On
    /// timeout the signal stays raised and the loop still exits on its own.
    pub async fn stop(&self, timeout: Duration) -> bool {
        if !self.is_running() {
            return true;
        }

        info!("Stopping scheduler...");
        self.inner.stop_tx.send_replace(true);

        let mut guard = self.handle.lock().await;
        let Some(handle) = guard.as_mut() else {
            return !self.is_running();
        };

        match tokio::time::timeout(timeout, handle).await {
            Ok(result) => {
                if let Err(e) = result {
                    error!("Scheduler loop ended abnormally: {}", e);
                }
                *guard = None;
                info!("Scheduler stopped");
                true
            }
            Err(_) => {
                error!("Scheduler did not stop within {:?}", timeout);
                false
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    pub fn state(&self) -> SchedulerState {
        if !self.is_running() {
            SchedulerState::Stopped
        } else if *self.inner.stop_tx.borrow() {
            SchedulerState::Stopping
        } else {
            SchedulerState::Running
        }
    }

    /// Delay the next cycle-level failure would wait.
    pub async fn current_backoff(&self) -> Duration {
        self.inner.backoff.lock().await.peek()
    }

    pub fn cycles_completed(&self) -> u64 {
        self.inner.cycles_completed.load(Ordering::Acquire)
    }

    pub async fn last_report(&self) -> Option<CycleReport> {
        self.inner.last_report.read().await.clone()
    }
}

/// Sleeps for `duration` unless the stop signal is raised first. Returns
/// whether a stop was requested.
pub(crate) async fn sleep_or_stop(stop_rx: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    sleep_until_or_stop(stop_rx, Instant::now() + duration).await
}

pub(crate) async fn sleep_until_or_stop(
    stop_rx: &mut watch::Receiver<bool>,
    deadline: Instant,
) -> bool {
    if *stop_rx.borrow_and_update() {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep_until(deadline) => *stop_rx.borrow(),
        changed = stop_rx.changed() => changed.is_err() || *stop_rx.borrow_and_update(),
    }
}

impl Inner {
    async fn run_loop(self: Arc<Self>) {
        let mut stop_rx = self.stop_tx.subscribe();
        info!("Scheduler loop started");

        loop {
            if *stop_rx.borrow_and_update() {
                break;
            }

            if self.registry.is_empty().await {
                debug!(
                    "No registered agents, sleeping {:?}",
                    self.config.idle_sleep
                );
                if sleep_or_stop(&mut stop_rx, self.config.idle_sleep).await {
                    break;
                }
                continue;
            }

            let delay = match self.tick(&mut stop_rx).await {
                Ok(interval) => {
                    debug!("Next cycle in {:?}", interval);
                    interval
                }
                Err(e) => {
                    let delay = self.backoff.lock().await.next_delay();
                    error!("Scheduler cycle failed: {}", e);
                    warn!("Retrying in {:?}", delay);
                    delay
                }
            };

            if sleep_or_stop(&mut stop_rx, delay).await {
                break;
            }
        }

        info!("Scheduler loop exited");
    }

    /// One cycle plus the interval read. Returns how long to sleep.
    async fn tick(&self, stop_rx: &mut watch::Receiver<bool>) -> Result<Duration, SchedulerError> {
        let report = self.run_cycle(stop_rx).await?;
        let interrupted = report.interrupted;

        self.cycles_completed.fetch_add(1, Ordering::AcqRel);
        *self.last_report.write().await = Some(report);
        self.backoff.lock().await.reset();

        if interrupted {
            return Ok(Duration::ZERO);
        }

        let settings = self
            .ledger
            .get_settings()
            .await
            .map_err(SchedulerError::Settings)?;
        Ok(settings.cycle_interval())
    }

    async fn run_cycle(
        &self,
        stop_rx: &mut watch::Receiver<bool>,
    ) -> Result<CycleReport, SchedulerError> {
        let settings = self
            .ledger
            .get_settings()
            .await
            .map_err(SchedulerError::Settings)?;
        let engines = self.registry.snapshot().await;

        let mut report = CycleReport {
            cycle: self.cycles_completed.load(Ordering::Acquire) + 1,
            started_at: Some(Utc::now()),
            agents: engines.len(),
            workers: settings.max_concurrency.max(1).min(engines.len().max(1)),
            ..CycleReport::default()
        };
        debug!(
            cycle = report.cycle,
            agents = report.agents,
            workers = report.workers,
            "Cycle started"
        );

        let deadline = Instant::now() + settings.per_agent_timeout();
        let semaphore = Arc::new(Semaphore::new(report.workers));
        let mut tasks = JoinSet::new();
        let mut tracked: HashMap<AgentId, TrackedTask> = HashMap::new();
        let mut task_agents: HashMap<task::Id, AgentId> = HashMap::new();

        for (agent_id, engine) in engines {
            if *stop_rx.borrow_and_update() {
                info!(
                    cycle = report.cycle,
                    "Stop requested, not submitting remaining agents"
                );
                report.interrupted = true;
                break;
            }

            let started = Arc::new(AtomicBool::new(false));
            tracked.insert(
                agent_id,
                TrackedTask {
                    started: started.clone(),
                },
            );

            let permits = semaphore.clone();
            let handle = tasks.spawn(async move {
                // A closed semaphore means the tick is over before this agent ran.
                let Ok(_permit) = permits.acquire_owned().await else {
                    return (agent_id, None);
                };
                started.store(true, Ordering::Release);
                (agent_id, Some(engine.execute_cycle().await))
            });
            task_agents.insert(handle.id(), agent_id);
            report.submitted += 1;
        }

        let wait = tokio::time::sleep_until(deadline);
        tokio::pin!(wait);

        while !report.interrupted {
            tokio::select! {
                joined = tasks.join_next() => match joined {
                    None => break,
                    Some(Ok((agent_id, outcome))) => {
                        tracked.remove(&agent_id);
                        match outcome {
                            Some(Ok(outcome)) => {
                                report.succeeded += 1;
                                let rejected = outcome.results.iter().filter(|r| !r.is_success()).count();
                                info!(
                                    agent_id,
                                    total_value = outcome.portfolio.total_value,
                                    orders = outcome.results.len(),
                                    rejected,
                                    "Agent cycle completed"
                                );
                            }
                            Some(Err(e)) => {
                                report.failed += 1;
                                error!(agent_id, error = %e, "Agent cycle failed");
                            }
                            None => report.skipped += 1,
                        }
                    }
                    Some(Err(e)) => {
                        report.failed += 1;
                        match task_agents.get(&e.id()) {
                            Some(agent_id) => {
                                tracked.remove(agent_id);
                                error!(agent_id = *agent_id, error = %e, "Agent task died");
                            }
                            None => error!(error = %e, "Agent task died"),
                        }
                    }
                },
                _ = &mut wait => break,
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow_and_update() {
                        info!(cycle = report.cycle, "Stop requested, leaving pending agents to finish");
                        report.interrupted = true;
                        break;
                    }
                }
            }
        }

        if report.interrupted {
            // Submitted agents keep their place in the pool and finish on
            // their own; queued ones still get a permit as others complete.
            report.abandoned = tracked.len();
            if !tracked.is_empty() {
                info!(
                    cycle = report.cycle,
                    pending = tracked.len(),
                    "Agents left running after stop"
                );
            }
        } else {
            // Deadline reached: queued agents give up once the semaphore
            // closes; running ones are not awaited.
            semaphore.close();
            for (agent_id, entry) in tracked {
                if entry.started.load(Ordering::Acquire) {
                    report.timed_out += 1;
                    warn!(
                        agent_id,
                        timeout = ?settings.per_agent_timeout(),
                        "Agent cycle timed out, retrying next tick"
                    );
                } else {
                    report.skipped += 1;
                    debug!(agent_id, "Agent not started this tick");
                }
            }
        }
        tasks.detach_all();

        info!(
            cycle = report.cycle,
            succeeded = report.succeeded,
            failed = report.failed,
            timed_out = report.timed_out,
            skipped = report.skipped,
            abandoned = report.abandoned,
            "Cycle complete"
        );
        Ok(report)
    }
}

//! Market history collector
//!
//! Background task that snapshots the tracked instruments' quotes on a fixed
//! schedule and files them in the ledger's `market_prices` table. Started and
//! stopped the same way as the scheduler: one spawned loop, a `watch` stop
//! signal, and a bounded wait in `stop`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::application::scheduler::sleep_until_or_stop;
use crate::domain::entities::quote::PriceBar;
use crate::domain::errors::CollectorError;
use crate::domain::repositories::ledger::Ledger;
use crate::domain::services::quote_cache::QuoteCache;

#[derive(Debug, Clone)]
pub struct MarketHistoryConfig {
    pub enabled: bool,
    /// Time between snapshots
    pub interval: Duration,
    /// Bucket width rows are filed under
    pub resolution_seconds: i64,
}

impl Default for MarketHistoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(60),
            resolution_seconds: 60,
        }
    }
}

struct Inner {
    ledger: Arc<dyn Ledger>,
    quotes: Arc<QuoteCache>,
    instruments: Vec<String>,
    interval: Duration,
    resolution_seconds: i64,
    stop_tx: watch::Sender<bool>,
    running: AtomicBool,
    snapshots_recorded: AtomicU64,
}

struct RunningGuard(Arc<Inner>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.running.store(false, Ordering::Release);
    }
}

pub struct MarketHistoryCollector {
    inner: Arc<Inner>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl MarketHistoryCollector {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        quotes: Arc<QuoteCache>,
        instruments: Vec<String>,
        config: &MarketHistoryConfig,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                ledger,
                quotes,
                instruments,
                interval: config.interval.max(Duration::from_secs(1)),
                resolution_seconds: config.resolution_seconds.max(1),
                stop_tx,
                running: AtomicBool::new(false),
                snapshots_recorded: AtomicU64::new(0),
            }),
            handle: Mutex::new(None),
        }
    }

    pub async fn start(&self) {
        if self.inner.running.swap(true, Ordering::AcqRel) {
            warn!("Market history collector already running");
            return;
        }
        self.inner.stop_tx.send_replace(false);

        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            let guard = RunningGuard(inner);
            guard.0.clone().run_loop().await;
        });
        *self.handle.lock().await = Some(handle);
        info!(
            "Market history collector started (every {:?}, {}s resolution)",
            self.inner.interval, self.inner.resolution_seconds
        );
    }

    /// Same contract as `Scheduler::stop`.
    pub async fn stop(&self, timeout: Duration) -> bool {
        if !self.is_running() {
            return true;
        }
        self.inner.stop_tx.send_replace(true);

        let mut guard = self.handle.lock().await;
        let Some(handle) = guard.as_mut() else {
            return !self.is_running();
        };

        match tokio::time::timeout(timeout, handle).await {
            Ok(result) => {
                if let Err(e) = result {
                    error!("Market history loop ended abnormally: {}", e);
                }
                *guard = None;
                info!("Market history collector stopped");
                true
            }
            Err(_) => {
                error!("Market history collector did not stop within {:?}", timeout);
                false
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Snapshots stored since construction.
    pub fn snapshots_recorded(&self) -> u64 {
        self.inner.snapshots_recorded.load(Ordering::Acquire)
    }

    /// Takes and stores one snapshot now. Returns the number of rows written.
    pub async fn collect_once(&self) -> Result<usize, CollectorError> {
        self.inner.collect_snapshot().await
    }
}

impl Inner {
    async fn run_loop(self: Arc<Self>) {
        let mut stop_rx = self.stop_tx.subscribe();
        let mut next_run = Instant::now();

        loop {
            if *stop_rx.borrow_and_update() {
                break;
            }

            match self.collect_snapshot().await {
                Ok(rows) => debug!("Recorded {} market history rows", rows),
                Err(e) => error!("Market history snapshot failed: {}", e),
            }

            // Missed slots are skipped, not replayed.
            let now = Instant::now();
            while next_run <= now {
                next_run += self.interval;
            }
            if sleep_until_or_stop(&mut stop_rx, next_run).await {
                break;
            }
        }

        info!("Market history loop exited");
    }

    async fn collect_snapshot(&self) -> Result<usize, CollectorError> {
        let quotes = self.quotes.get_quotes(&self.instruments).await?;
        let at = Utc::now();
        let bars: Vec<PriceBar> = self
            .instruments
            .iter()
            .filter_map(|instrument| quotes.get(instrument))
            .map(|quote| PriceBar::from_quote(quote, self.resolution_seconds, at))
            .collect();
        if bars.is_empty() {
            return Ok(0);
        }

        let written = self.ledger.record_market_prices(&bars).await?;
        self.snapshots_recorded.fetch_add(1, Ordering::AcqRel);
        Ok(written)
    }
}

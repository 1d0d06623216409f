use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Shortest allowed pause between scheduler ticks.
pub const MIN_CYCLE_INTERVAL_MINUTES: i64 = 1;

/// Runtime settings stored in the ledger and re-read every tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub cycle_interval_minutes: i64,
    pub fee_rate: f64,
    pub max_concurrency: usize,
    pub per_agent_timeout_seconds: u64,
}

impl Settings {
    pub fn cycle_interval(&self) -> Duration {
        let minutes = self.cycle_interval_minutes.max(MIN_CYCLE_INTERVAL_MINUTES);
        Duration::from_secs(minutes as u64 * 60)
    }

    pub fn per_agent_timeout(&self) -> Duration {
        Duration::from_secs(self.per_agent_timeout_seconds.max(1))
    }

    /// Negative or non-finite rates are treated as fee-free.
    pub fn effective_fee_rate(&self) -> f64 {
        if self.fee_rate.is_finite() && self.fee_rate > 0.0 {
            self.fee_rate
        } else {
            0.0
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cycle_interval_minutes: 60,
            fee_rate: 0.001,
            max_concurrency: 4,
            per_agent_timeout_seconds: 300,
        }
    }
}

use crate::domain::entities::quote::Indicators;

/// Closes needed before any indicator is reported.
pub const MIN_HISTORY_POINTS: usize = 14;

pub struct SMA {
    pub period: usize,
}

impl SMA {
    pub fn new(period: usize) -> Self {
        SMA { period }
    }

    /// Rolling averages, one per full window.
    pub fn calculate_on_values(&self, values: &[f64]) -> Vec<f64> {
        if self.period == 0 || values.len() < self.period {
            return vec![];
        }
        values
            .windows(self.period)
            .map(|window| window.iter().sum::<f64>() / self.period as f64)
            .collect()
    }

    pub fn latest(&self, values: &[f64]) -> Option<f64> {
        self.calculate_on_values(values).last().copied()
    }
}

pub struct RSI {
    pub period: usize,
}

impl RSI {
    pub fn new(period: usize) -> Self {
        RSI { period }
    }

    /// Simple-average RSI over the last `period` changes.
    pub fn latest(&self, values: &[f64]) -> Option<f64> {
        if self.period == 0 || values.len() < self.period + 1 {
            return None;
        }
        let mut gains = 0.0;
        let mut losses = 0.0;
        let window = &values[values.len() - self.period - 1..];
        for pair in window.windows(2) {
            let change = pair[1] - pair[0];
            if change > 0.0 {
                gains += change;
            } else {
                losses += change.abs();
            }
        }

        let avg_gain = gains / self.period as f64;
        let avg_loss = losses / self.period as f64;
        if avg_loss == 0.0 {
            return Some(100.0);
        }
        let rs = avg_gain / avg_loss;
        Some(100.0 - (100.0 / (1.0 + rs)))
    }
}

/// Indicator set from daily closes, oldest first. `None` when history is too
/// short to be meaningful.
pub fn compute_indicators(closes: &[f64]) -> Option<Indicators> {
    if closes.len() < MIN_HISTORY_POINTS {
        return None;
    }
    let current_price = *closes.last()?;
    let sma_7 = SMA::new(7).latest(closes)?;
    let sma_14 = SMA::new(14).latest(closes)?;
    let rsi_14 = RSI::new(14).latest(closes).unwrap_or(50.0);

    let reference = if closes.len() > 7 {
        closes[closes.len() - 8]
    } else {
        closes[0]
    };
    let price_change_7d = if reference > 0.0 {
        (current_price - reference) / reference * 100.0
    } else {
        0.0
    };

    Some(Indicators {
        sma_7,
        sma_14,
        rsi_14,
        current_price,
        price_change_7d,
    })
}

use std::collections::VecDeque;

use crate::models::Candle;

/// Volatility classification of one closed candle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolatilityReading {
    pub range: f64,
    /// Mean high-low range of the `period` candles before this one
    pub avg_range: Option<f64>,
    /// Percentile of all rolling ranges observed so far
    pub quiet_threshold: Option<f64>,
    pub is_giant: bool,
    pub is_quiet: bool,
}

/// Tracks rolling candle ranges for giant-candle and quiet-market detection
///
/// The quiet threshold is a percentile over every rolling-range observation
/// kept (up to `history_cap`), not a trailing window.
#[derive(Debug, Clone)]
pub struct RangeTracker {
    period: usize,
    giant_multiplier: f64,
    giant_floor: f64,
    quiet_percentile: f64,
    quiet_min_samples: usize,
    history_cap: usize,
    window: VecDeque<f64>,
    observations: VecDeque<f64>,
}

impl RangeTracker {
    pub fn new(
        period: usize,
        giant_multiplier: f64,
        giant_floor: f64,
        quiet_percentile: f64,
        quiet_min_samples: usize,
        history_cap: usize,
    ) -> Self {
        Self {
            period: period.max(1),
            giant_multiplier,
            giant_floor,
            quiet_percentile,
            quiet_min_samples,
            history_cap: history_cap.max(1),
            window: VecDeque::with_capacity(period.max(1)),
            observations: VecDeque::new(),
        }
    }

    /// Classify the next closed candle and fold it into the rolling state
    pub fn next(&mut self, candle: &Candle) -> VolatilityReading {
        let range = candle.range();

        let avg_range = if self.window.len() == self.period {
            Some(self.window.iter().sum::<f64>() / self.period as f64)
        } else {
            None
        };

        self.window.push_back(range);
        while self.window.len() > self.period {
            self.window.pop_front();
        }

        if let Some(avg) = avg_range {
            self.observations.push_back(avg);
            while self.observations.len() > self.history_cap {
                self.observations.pop_front();
            }
        }

        let quiet_threshold = self.threshold();

        let is_giant = avg_range
            .map(|avg| range > self.giant_multiplier * avg && range > self.giant_floor)
            .unwrap_or(false);

        let is_quiet = match (avg_range, quiet_threshold) {
            (Some(avg), Some(threshold)) => avg < threshold,
            _ => false,
        };

        VolatilityReading {
            range,
            avg_range,
            quiet_threshold,
            is_giant,
            is_quiet,
        }
    }

    /// Percentile of observed rolling ranges, once enough samples exist
    pub fn threshold(&self) -> Option<f64> {
        if self.observations.len() < self.quiet_min_samples || self.observations.is_empty() {
            return None;
        }
        let mut sorted: Vec<f64> = self.observations.iter().copied().collect();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let index = ((sorted.len() as f64) * self.quiet_percentile) as usize;
        sorted.get(index.min(sorted.len() - 1)).copied()
    }

    pub fn observation_count(&self) -> usize {
        self.observations.len()
    }
}

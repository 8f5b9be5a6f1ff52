use crate::models::Candle;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;

/// In-memory rolling window of closed candles for one symbol
///
/// Owned by the indicator state; access is serialized by the engine.
#[derive(Debug, Clone)]
pub struct CandleBuffer {
    candles: VecDeque<Candle>,
    max_candles: usize,
}

impl CandleBuffer {
    /// Create a new candle buffer
    ///
    /// # Arguments
    /// * `max_candles` - Maximum number of candles to keep
    pub fn new(max_candles: usize) -> Self {
        Self {
            candles: VecDeque::new(),
            max_candles: max_candles.max(1),
        }
    }

    /// Add a closed candle
    ///
    /// Returns false (and drops the candle) when it is not newer than the
    /// latest buffered candle. If the buffer is full, removes the oldest.
    pub fn add_candle(&mut self, candle: Candle) -> bool {
        if let Some(last) = self.last_open_time() {
            if candle.open_time <= last {
                return false;
            }
        }

        self.candles.push_back(candle);

        while self.candles.len() > self.max_candles {
            self.candles.pop_front();
        }

        true
    }

    /// Get the N most recent closes, oldest first
    pub fn recent_closes(&self, n: usize) -> Vec<f64> {
        let skip = self.candles.len().saturating_sub(n);
        self.candles.iter().skip(skip).map(|c| c.close).collect()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.back()
    }

    pub fn last_open_time(&self) -> Option<DateTime<Utc>> {
        self.candles.back().map(|c| c.open_time)
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_candles
    }

    pub fn clear(&mut self) {
        self.candles.clear();
    }
}

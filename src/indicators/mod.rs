// Technical indicators module
// Wilder RSI, Bollinger Bands and rolling-range volatility, fed one closed candle at a time

pub mod bollinger;
pub mod rsi;
pub mod volatility;

pub use bollinger::{calculate_bollinger, BollingerBands};
pub use rsi::{calculate_rsi, WilderRsi};
pub use volatility::{RangeTracker, VolatilityReading};

use serde::{Deserialize, Serialize};

use crate::execution::CandleBuffer;
use crate::models::Candle;

/// Periods and constants for the adaptive indicator set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorSettings {
    pub rsi_period: usize,
    pub bollinger_period: usize,
    pub bollinger_k: f64,
    pub range_period: usize,
    pub giant_multiplier: f64,
    pub giant_floor: f64,
    pub quiet_percentile: f64,
    pub quiet_min_samples: usize,
    pub history_capacity: usize,
}

impl Default for IndicatorSettings {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            bollinger_period: 20,
            bollinger_k: 2.0,
            range_period: 20,
            giant_multiplier: 3.0,
            giant_floor: 15.0,
            quiet_percentile: 0.25,
            quiet_min_samples: 100,
            history_capacity: 10_000,
        }
    }
}

/// Decision inputs derived from the most recently closed candle
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorSnapshot {
    pub candle: Candle,
    pub rsi: Option<f64>,
    pub bands: Option<BollingerBands>,
    pub volatility: VolatilityReading,
}

impl IndicatorSnapshot {
    /// True once every indicator has produced a value
    pub fn is_warm(&self) -> bool {
        self.rsi.is_some() && self.bands.is_some() && self.volatility.avg_range.is_some()
    }
}

/// Incrementally maintained indicator state over a bounded candle history
#[derive(Debug, Clone)]
pub struct IndicatorState {
    settings: IndicatorSettings,
    buffer: CandleBuffer,
    rsi: WilderRsi,
    ranges: RangeTracker,
    latest: Option<IndicatorSnapshot>,
}

impl IndicatorState {
    pub fn new(settings: IndicatorSettings) -> Self {
        Self {
            buffer: CandleBuffer::new(settings.history_capacity),
            rsi: WilderRsi::new(settings.rsi_period),
            ranges: RangeTracker::new(
                settings.range_period,
                settings.giant_multiplier,
                settings.giant_floor,
                settings.quiet_percentile,
                settings.quiet_min_samples,
                settings.history_capacity,
            ),
            latest: None,
            settings,
        }
    }

    /// Fold in the next closed candle
    ///
    /// Returns None for candles that are not newer than the history
    /// (duplicates from a reconnect bootstrap).
    pub fn on_closed_candle(&mut self, candle: &Candle) -> Option<IndicatorSnapshot> {
        if !self.buffer.add_candle(candle.clone()) {
            return None;
        }

        let rsi = self.rsi.next(candle.close);
        let closes = self.buffer.recent_closes(self.settings.bollinger_period);
        let bands = calculate_bollinger(
            &closes,
            self.settings.bollinger_period,
            self.settings.bollinger_k,
        );
        let volatility = self.ranges.next(candle);

        let snapshot = IndicatorSnapshot {
            candle: candle.clone(),
            rsi,
            bands,
            volatility,
        };
        self.latest = Some(snapshot.clone());
        Some(snapshot)
    }

    pub fn latest(&self) -> Option<&IndicatorSnapshot> {
        self.latest.as_ref()
    }

    pub fn candle_count(&self) -> usize {
        self.buffer.len()
    }

    pub fn settings(&self) -> &IndicatorSettings {
        &self.settings
    }
}

// Trading strategy module
pub mod levels;
pub mod threshold;

pub use levels::{evaluate_crossing, Crossing, LevelParams, LevelStrategy};
pub use threshold::{evaluate_threshold, AdaptiveParams, AdaptiveStrategy, Setup, ThresholdTier};

use serde::{Deserialize, Serialize};

use crate::models::{Candle, Signal, Tick};
use crate::Result;

/// Base trait for all decision strategies
///
/// Evaluation is synchronous and side-effect free apart from the
/// strategy's own indicator state; risk gating happens downstream.
pub trait Strategy: Send + Sync {
    /// Get strategy name
    fn name(&self) -> &str;

    /// Evaluate a live tick against the previous one
    fn on_tick(&mut self, tick: &Tick, prev: Option<&Tick>) -> Option<Signal>;

    /// Fold in a closed candle
    fn on_candle_closed(&mut self, candle: &Candle);

    /// Warm state from fetched history without arming anything
    fn on_bootstrap(&mut self, _candles: &[Candle]) {}

    /// Drop any armed entry (halt, session end)
    fn clear_pending(&mut self) {}

    /// Minimum closed candles before signals are possible
    fn min_candles_required(&self) -> usize;
}

/// Session-scoped strategy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyParams {
    StaticLevels(LevelParams),
    Adaptive(AdaptiveParams),
}

impl StrategyParams {
    pub fn validate(&self) -> Result<()> {
        match self {
            StrategyParams::StaticLevels(p) => p.validate(),
            StrategyParams::Adaptive(p) => p.validate(),
        }
    }

    /// Build a fresh strategy instance for a new session
    pub fn build(&self) -> Result<Box<dyn Strategy>> {
        Ok(match self {
            StrategyParams::StaticLevels(p) => Box::new(LevelStrategy::new(p.clone())?),
            StrategyParams::Adaptive(p) => Box::new(AdaptiveStrategy::new(p.clone())?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_static_levels() {
        let params = StrategyParams::StaticLevels(LevelParams::two(2000.0, 1900.0, 10.0));
        let strategy = params.build().unwrap();
        assert_eq!(strategy.name(), "StaticLevels");
        assert_eq!(strategy.min_candles_required(), 0);
    }

    #[test]
    fn test_build_rejects_invalid_levels() {
        let params = StrategyParams::StaticLevels(LevelParams::two(1900.0, 2000.0, 10.0));
        assert!(params.build().is_err());
    }

    #[test]
    fn test_adaptive_needs_warmup() {
        let strategy = StrategyParams::Adaptive(AdaptiveParams::default())
            .build()
            .unwrap();
        assert_eq!(strategy.name(), "AdaptiveIndicator");
        assert_eq!(strategy.min_candles_required(), 21);
    }

    #[test]
    fn test_params_deserialize_tagged() {
        let json = r#"{"kind":"static_levels","strong_resistance":4000.0,"weak_resistance":3950.0,"weak_support":3900.0,"strong_support":3850.0}"#;
        let params: StrategyParams = serde_json::from_str(json).unwrap();
        match params {
            StrategyParams::StaticLevels(p) => {
                assert_eq!(p.weak_support, Some(3900.0));
                assert_eq!(p.stake, 10.0);
            }
            _ => panic!("expected static levels"),
        }
    }
}

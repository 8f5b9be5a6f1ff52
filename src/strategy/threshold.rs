use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Strategy;
use crate::error::EngineError;
use crate::indicators::{IndicatorSettings, IndicatorSnapshot, IndicatorState};
use crate::models::{Candle, Direction, LevelRef, Signal, Tick};
use crate::Result;

/// RSI thresholds for one market regime
///
/// `long_extreme` sits below `long`, `short_extreme` above `short`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdTier {
    pub long: f64,
    pub long_extreme: f64,
    pub short: f64,
    pub short_extreme: f64,
}

impl ThresholdTier {
    fn validate(&self, name: &str) -> Result<()> {
        let all = [self.long, self.long_extreme, self.short, self.short_extreme];
        if all.iter().any(|v| !(0.0..=100.0).contains(v)) {
            return Err(EngineError::config(format!(
                "{name} thresholds must lie within 0..=100"
            )));
        }
        if self.long_extreme > self.long || self.short_extreme < self.short {
            return Err(EngineError::config(format!(
                "{name} extreme thresholds must be wider than the standard ones"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveParams {
    pub indicators: IndicatorSettings,
    pub normal: ThresholdTier,
    pub quiet: ThresholdTier,
    pub standard_stake: f64,
    pub extreme_stake: f64,
}

impl Default for AdaptiveParams {
    fn default() -> Self {
        Self {
            indicators: IndicatorSettings::default(),
            normal: ThresholdTier {
                long: 25.0,
                long_extreme: 20.0,
                short: 75.0,
                short_extreme: 80.0,
            },
            quiet: ThresholdTier {
                long: 30.0,
                long_extreme: 25.0,
                short: 70.0,
                short_extreme: 75.0,
            },
            standard_stake: 10.0,
            extreme_stake: 15.0,
        }
    }
}

impl AdaptiveParams {
    pub fn validate(&self) -> Result<()> {
        let ind = &self.indicators;
        if ind.rsi_period == 0 || ind.bollinger_period == 0 || ind.range_period == 0 {
            return Err(EngineError::config("indicator periods must be non-zero"));
        }
        if !(ind.bollinger_k.is_finite() && ind.bollinger_k > 0.0) {
            return Err(EngineError::config("bollinger_k must be positive"));
        }
        if !(0.0..1.0).contains(&ind.quiet_percentile) {
            return Err(EngineError::config("quiet_percentile must be within [0, 1)"));
        }
        if ind.history_capacity < ind.bollinger_period.max(ind.rsi_period + 1) {
            return Err(EngineError::config(
                "history_capacity must cover the longest indicator period",
            ));
        }
        self.normal.validate("normal")?;
        self.quiet.validate("quiet")?;
        if !(self.standard_stake > 0.0 && self.extreme_stake > 0.0) {
            return Err(EngineError::config("stakes must be positive"));
        }
        Ok(())
    }
}

/// Entry armed by a closed candle, waiting for price to reach the band
#[derive(Debug, Clone, PartialEq)]
pub struct Setup {
    pub direction: Direction,
    pub trigger_price: f64,
    pub stake: f64,
    pub level_ref: LevelRef,
    pub rsi: f64,
    pub quiet: bool,
    pub setup_time: DateTime<Utc>,
}

/// Threshold rule over the indicators of the last closed candle
///
/// Returns None while any indicator is still warming up, and for giant
/// candles. When both sides qualify (only possible with overlapping
/// thresholds) the short side wins.
pub fn evaluate_threshold(snapshot: &IndicatorSnapshot, params: &AdaptiveParams) -> Option<Setup> {
    if !snapshot.is_warm() {
        return None;
    }
    let rsi = snapshot.rsi?;
    let bands = snapshot.bands?;

    if snapshot.volatility.is_giant {
        tracing::info!(
            range = snapshot.volatility.range,
            avg_range = ?snapshot.volatility.avg_range,
            "Giant candle detected, skipping signal"
        );
        return None;
    }

    let quiet = snapshot.volatility.is_quiet;
    let tier = if quiet { &params.quiet } else { &params.normal };

    let (direction, trigger_price, level_ref, extreme) = if rsi > tier.short {
        (
            Direction::Short,
            bands.upper,
            LevelRef::RsiOverbought,
            rsi > tier.short_extreme,
        )
    } else if rsi < tier.long {
        (
            Direction::Long,
            bands.lower,
            LevelRef::RsiOversold,
            rsi < tier.long_extreme,
        )
    } else {
        return None;
    };

    Some(Setup {
        direction,
        trigger_price,
        stake: if extreme {
            params.extreme_stake
        } else {
            params.standard_stake
        },
        level_ref,
        rsi,
        quiet,
        setup_time: snapshot.candle.open_time,
    })
}

/// Mean-reversion strategy on RSI extremes, entering at the Bollinger band
#[derive(Debug, Clone)]
pub struct AdaptiveStrategy {
    params: AdaptiveParams,
    indicators: IndicatorState,
    pending: Option<Setup>,
}

impl AdaptiveStrategy {
    pub fn new(params: AdaptiveParams) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            indicators: IndicatorState::new(params.indicators.clone()),
            params,
            pending: None,
        })
    }

    pub fn pending(&self) -> Option<&Setup> {
        self.pending.as_ref()
    }

    pub fn indicators(&self) -> &IndicatorState {
        &self.indicators
    }
}

impl Strategy for AdaptiveStrategy {
    fn name(&self) -> &str {
        "AdaptiveIndicator"
    }

    fn on_tick(&mut self, tick: &Tick, _prev: Option<&Tick>) -> Option<Signal> {
        let setup = self.pending.as_ref()?;

        let reached = match setup.direction {
            Direction::Long => tick.price <= setup.trigger_price,
            Direction::Short => tick.price >= setup.trigger_price,
        };
        if !reached {
            return None;
        }

        let setup = self.pending.take()?;
        tracing::debug!(
            armed_at = %setup.setup_time,
            waited_secs = (tick.timestamp - setup.setup_time).num_seconds(),
            "Band reached"
        );
        Some(Signal {
            direction: setup.direction,
            trigger_price: tick.price,
            reason: format!(
                "rsi {:.1} {} band {:.2}{}",
                setup.rsi,
                if setup.direction == Direction::Long { "lower" } else { "upper" },
                setup.trigger_price,
                if setup.quiet { " (quiet market)" } else { "" }
            ),
            level_ref: setup.level_ref,
            stake: setup.stake,
        })
    }

    fn on_candle_closed(&mut self, candle: &Candle) {
        let Some(snapshot) = self.indicators.on_closed_candle(candle) else {
            return;
        };

        tracing::info!(
            close = candle.close,
            rsi = ?snapshot.rsi,
            quiet = snapshot.volatility.is_quiet,
            "Candle closed"
        );

        self.pending = evaluate_threshold(&snapshot, &self.params);
        if let Some(setup) = &self.pending {
            tracing::info!(
                direction = %setup.direction,
                trigger = setup.trigger_price,
                stake = setup.stake,
                "Setup armed at band"
            );
        }
    }

    fn on_bootstrap(&mut self, candles: &[Candle]) {
        let before = self.indicators.candle_count();
        for candle in candles {
            self.indicators.on_closed_candle(candle);
        }
        let latest = self.indicators.latest();
        tracing::info!(
            added = self.indicators.candle_count() - before,
            total = self.indicators.candle_count(),
            rsi = ?latest.and_then(|s| s.rsi),
            warm = latest.map_or(false, |s| s.is_warm()),
            "Warmed indicators from history"
        );
    }

    fn clear_pending(&mut self) {
        self.pending = None;
    }

    fn min_candles_required(&self) -> usize {
        let ind = &self.params.indicators;
        (ind.rsi_period + 1)
            .max(ind.bollinger_period)
            .max(ind.range_period + 1)
    }
}

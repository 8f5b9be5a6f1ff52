use serde::{Deserialize, Serialize};

use super::Strategy;
use crate::error::EngineError;
use crate::models::{Candle, Direction, Level, LevelRef, Signal, Tick};
use crate::Result;

/// Operator-supplied price box: two outer levels, optionally two inner ones
///
/// Invariant: strong_support <= weak_support < weak_resistance <= strong_resistance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelParams {
    pub strong_resistance: f64,
    #[serde(default)]
    pub weak_resistance: Option<f64>,
    #[serde(default)]
    pub weak_support: Option<f64>,
    pub strong_support: f64,
    #[serde(default = "default_stake")]
    pub stake: f64,
}

fn default_stake() -> f64 {
    10.0
}

impl LevelParams {
    pub fn four(
        strong_resistance: f64,
        weak_resistance: f64,
        weak_support: f64,
        strong_support: f64,
        stake: f64,
    ) -> Self {
        Self {
            strong_resistance,
            weak_resistance: Some(weak_resistance),
            weak_support: Some(weak_support),
            strong_support,
            stake,
        }
    }

    pub fn two(resistance: f64, support: f64, stake: f64) -> Self {
        Self {
            strong_resistance: resistance,
            weak_resistance: None,
            weak_support: None,
            strong_support: support,
            stake,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let prices = [
            Some(self.strong_resistance),
            self.weak_resistance,
            self.weak_support,
            Some(self.strong_support),
        ];
        if prices.iter().flatten().any(|p| !p.is_finite() || *p <= 0.0) {
            return Err(EngineError::config("levels must be positive prices"));
        }
        if !(self.stake.is_finite() && self.stake > 0.0) {
            return Err(EngineError::config("level stake must be positive"));
        }

        match (self.weak_resistance, self.weak_support) {
            (Some(wr), Some(ws)) => {
                if !(self.strong_support <= ws && ws < wr && wr <= self.strong_resistance) {
                    return Err(EngineError::config(format!(
                        "levels out of order: need strong_support {} <= weak_support {} < weak_resistance {} <= strong_resistance {}",
                        self.strong_support, ws, wr, self.strong_resistance
                    )));
                }
            }
            (None, None) => {
                if self.strong_support >= self.strong_resistance {
                    return Err(EngineError::config(format!(
                        "support {} must be below resistance {}",
                        self.strong_support, self.strong_resistance
                    )));
                }
            }
            _ => {
                return Err(EngineError::config(
                    "weak_resistance and weak_support must be given together (2 or 4 levels)",
                ));
            }
        }
        Ok(())
    }

    pub fn levels(&self) -> Vec<Level> {
        let mut levels = vec![Level {
            kind: LevelRef::StrongResistance,
            value: self.strong_resistance,
        }];
        if let Some(value) = self.weak_resistance {
            levels.push(Level {
                kind: LevelRef::WeakResistance,
                value,
            });
        }
        if let Some(value) = self.weak_support {
            levels.push(Level {
                kind: LevelRef::WeakSupport,
                value,
            });
        }
        levels.push(Level {
            kind: LevelRef::StrongSupport,
            value: self.strong_support,
        });
        levels
    }
}

/// A fresh level crossing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Crossing {
    pub direction: Direction,
    pub level: Level,
}

fn crossed_up(prev: f64, current: f64, level: f64) -> bool {
    prev < level && current >= level
}

fn crossed_down(prev: f64, current: f64, level: f64) -> bool {
    prev > level && current <= level
}

/// Crossing rule over the last two prices
///
/// Fires only when the previous price was strictly on the near side and the
/// current price is at or beyond the level. Strong levels win over weak ones,
/// and a weak crossing is dropped once price already reached the strong level.
/// A short (resistance) crossing is checked before a long (support) one.
pub fn evaluate_crossing(prev: f64, current: f64, params: &LevelParams) -> Option<Crossing> {
    let resistance = if crossed_up(prev, current, params.strong_resistance) {
        Some(Level {
            kind: LevelRef::StrongResistance,
            value: params.strong_resistance,
        })
    } else {
        params
            .weak_resistance
            .filter(|&wr| crossed_up(prev, current, wr) && current < params.strong_resistance)
            .map(|value| Level {
                kind: LevelRef::WeakResistance,
                value,
            })
    };

    if let Some(level) = resistance {
        return Some(Crossing {
            direction: Direction::Short,
            level,
        });
    }

    let support = if crossed_down(prev, current, params.strong_support) {
        Some(Level {
            kind: LevelRef::StrongSupport,
            value: params.strong_support,
        })
    } else {
        params
            .weak_support
            .filter(|&ws| crossed_down(prev, current, ws) && current > params.strong_support)
            .map(|value| Level {
                kind: LevelRef::WeakSupport,
                value,
            })
    };

    support.map(|level| Crossing {
        direction: Direction::Long,
        level,
    })
}

/// Box strategy over static levels: fade the touch of a level
#[derive(Debug, Clone)]
pub struct LevelStrategy {
    params: LevelParams,
}

impl LevelStrategy {
    pub fn new(params: LevelParams) -> Result<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &LevelParams {
        &self.params
    }
}

impl Strategy for LevelStrategy {
    fn name(&self) -> &str {
        "StaticLevels"
    }

    fn on_tick(&mut self, tick: &Tick, prev: Option<&Tick>) -> Option<Signal> {
        let prev = prev?;
        let crossing = evaluate_crossing(prev.price, tick.price, &self.params)?;

        Some(Signal {
            direction: crossing.direction,
            trigger_price: tick.price,
            reason: format!(
                "crossed {} {:.2} ({:.2} -> {:.2})",
                crossing.level.kind, crossing.level.value, prev.price, tick.price
            ),
            level_ref: crossing.level.kind,
            stake: self.params.stake,
        })
    }

    fn on_candle_closed(&mut self, _candle: &Candle) {}

    fn min_candles_required(&self) -> usize {
        0
    }
}

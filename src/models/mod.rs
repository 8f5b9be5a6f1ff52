use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Single trade-price update from the market feed
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
}

impl Tick {
    pub fn new(timestamp: DateTime<Utc>, price: f64) -> Self {
        Self { timestamp, price }
    }
}

/// OHLCV candlestick over a fixed time bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub closed: bool,
}

impl Candle {
    /// High-low range of the candle
    pub fn range(&self) -> f64 {
        self.high - self.low
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Long,
    Short,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

/// Which level (or indicator threshold) produced a signal
///
/// Also the key for per-level cooldowns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelRef {
    StrongResistance,
    WeakResistance,
    WeakSupport,
    StrongSupport,
    RsiOverbought,
    RsiOversold,
}

impl LevelRef {
    /// Outermost price levels; a loss taken there means the range broke
    pub fn is_outermost(&self) -> bool {
        matches!(self, LevelRef::StrongResistance | LevelRef::StrongSupport)
    }

    pub fn label(&self) -> &'static str {
        match self {
            LevelRef::StrongResistance => "strong resistance",
            LevelRef::WeakResistance => "weak resistance",
            LevelRef::WeakSupport => "weak support",
            LevelRef::StrongSupport => "strong support",
            LevelRef::RsiOverbought => "rsi overbought",
            LevelRef::RsiOversold => "rsi oversold",
        }
    }
}

impl fmt::Display for LevelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A configured price level
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Level {
    pub kind: LevelRef,
    pub value: f64,
}

/// Trading signal: created once by a strategy, consumed once by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub direction: Direction,
    pub trigger_price: f64,
    pub reason: String,
    pub level_ref: LevelRef,
    pub stake: f64,
}

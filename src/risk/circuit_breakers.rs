use chrono::{DateTime, FixedOffset, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use super::daily::{trading_day_id, DailyRiskState};
use crate::error::EngineError;
use crate::models::{LevelRef, Signal};
use crate::Result;

/// Local-time hour range `[start_hour, end_hour)`; wraps midnight when start > end
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradingWindow {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl TradingWindow {
    pub fn contains(&self, hour: u32) -> bool {
        if self.start_hour <= self.end_hour {
            hour >= self.start_hour && hour < self.end_hour
        } else {
            hour >= self.start_hour || hour < self.end_hour
        }
    }
}

/// Risk limits to prevent catastrophic losses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskLimits {
    pub cooldown_secs: u64,
    pub max_open_positions: usize,
    pub daily_stop_loss: f64,
    pub daily_reset_hour: u32,
    pub utc_offset_hours: i32,
    pub trading_windows: Vec<TradingWindow>,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            cooldown_secs: 60,        // per level
            max_open_positions: 5,
            daily_stop_loss: -45.0,   // cumulative floor
            daily_reset_hour: 9,
            utc_offset_hours: 8,
            trading_windows: vec![TradingWindow {
                start_hour: 9,
                end_hour: 20,
            }],
        }
    }
}

impl RiskLimits {
    pub fn validate(&self) -> Result<()> {
        if self.max_open_positions == 0 {
            return Err(EngineError::config("max_open_positions must be at least 1"));
        }
        if !(self.daily_stop_loss.is_finite() && self.daily_stop_loss < 0.0) {
            return Err(EngineError::config("daily_stop_loss must be a negative amount"));
        }
        if self.daily_reset_hour > 23 {
            return Err(EngineError::config("daily_reset_hour must be within 0..=23"));
        }
        if !(-12..=14).contains(&self.utc_offset_hours) {
            return Err(EngineError::config("utc_offset_hours must be within -12..=14"));
        }
        for w in &self.trading_windows {
            if w.start_hour > 24 || w.end_hour > 24 || w.start_hour == w.end_hour {
                return Err(EngineError::config(format!(
                    "invalid trading window {}-{}",
                    w.start_hour, w.end_hour
                )));
            }
        }
        Ok(())
    }

    pub fn offset(&self) -> Result<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_hours * 3600)
            .ok_or_else(|| EngineError::config("utc_offset_hours out of range"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    Cooldown,
    MaxOpenPositions,
    DailyLossHalt,
    OutsideTradingWindow,
    NoActiveSession,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RejectReason::Cooldown => "level cooldown active",
            RejectReason::MaxOpenPositions => "max open positions reached",
            RejectReason::DailyLossHalt => "daily stop-loss halt",
            RejectReason::OutsideTradingWindow => "outside trading window",
            RejectReason::NoActiveSession => "no active session",
        };
        f.write_str(text)
    }
}

/// Gatekeeper between strategy signals and the ledger
#[derive(Debug, Clone)]
pub struct RiskManager {
    limits: RiskLimits,
    offset: FixedOffset,
    state: DailyRiskState,
    last_trigger: HashMap<LevelRef, DateTime<Utc>>,
}

impl RiskManager {
    pub fn new(limits: RiskLimits, now: DateTime<Utc>) -> Result<Self> {
        limits.validate()?;
        let offset = limits.offset()?;
        let state = DailyRiskState::new(trading_day_id(now, offset, limits.daily_reset_hour));
        Ok(Self {
            limits,
            offset,
            state,
            last_trigger: HashMap::new(),
        })
    }

    /// Resume from a persisted daily state
    ///
    /// The caller should `roll` afterwards in case the day changed while down.
    pub fn with_state(limits: RiskLimits, state: DailyRiskState) -> Result<Self> {
        limits.validate()?;
        let offset = limits.offset()?;

        tracing::info!(
            day = %state.trading_day_id,
            pnl = state.cumulative_pnl,
            halted = state.is_halted,
            "Restored daily risk state"
        );

        Ok(Self {
            limits,
            offset,
            state,
            last_trigger: HashMap::new(),
        })
    }

    /// Check a signal against every rule, in order
    pub fn admit(
        &self,
        signal: &Signal,
        now: DateTime<Utc>,
        open_positions: usize,
    ) -> std::result::Result<(), RejectReason> {
        if let Some(last) = self.last_trigger.get(&signal.level_ref) {
            let elapsed = (now - *last).num_milliseconds();
            if elapsed < (self.limits.cooldown_secs as i64) * 1000 {
                return Err(RejectReason::Cooldown);
            }
        }

        if open_positions >= self.limits.max_open_positions {
            return Err(RejectReason::MaxOpenPositions);
        }

        if self.state.is_halted || self.state.cumulative_pnl <= self.limits.daily_stop_loss {
            return Err(RejectReason::DailyLossHalt);
        }

        if !self.in_trading_window(now) {
            return Err(RejectReason::OutsideTradingWindow);
        }

        Ok(())
    }

    pub fn in_trading_window(&self, now: DateTime<Utc>) -> bool {
        if self.limits.trading_windows.is_empty() {
            return true;
        }
        let hour = now.with_timezone(&self.offset).hour();
        self.limits.trading_windows.iter().any(|w| w.contains(hour))
    }

    /// Mark a level as just traded; pairs with position creation
    pub fn record_trigger(&mut self, level: LevelRef, now: DateTime<Utc>) {
        self.last_trigger.insert(level, now);
    }

    pub fn last_trigger(&self, level: LevelRef) -> Option<DateTime<Utc>> {
        self.last_trigger.get(&level).copied()
    }

    pub fn clear_cooldowns(&mut self) {
        self.last_trigger.clear();
    }

    /// Add settled PnL; returns true when this settlement trips the halt
    pub fn record_pnl(&mut self, pnl: f64) -> bool {
        self.state.cumulative_pnl += pnl;

        if !self.state.is_halted && self.state.cumulative_pnl <= self.limits.daily_stop_loss {
            self.state.is_halted = true;
            tracing::warn!(
                pnl = self.state.cumulative_pnl,
                floor = self.limits.daily_stop_loss,
                "🛑 Daily stop-loss reached, trading halted until next reset"
            );
            return true;
        }
        false
    }

    /// Reset daily state if `now` belongs to a later trading day
    ///
    /// Returns the previous day id when a reset happened.
    pub fn roll(&mut self, now: DateTime<Utc>) -> Option<String> {
        let today = trading_day_id(now, self.offset, self.limits.daily_reset_hour);
        let previous = self.state.trading_day_id.clone();
        if self.state.roll(&today) {
            tracing::info!(from = %previous, to = %today, "Daily risk state reset");
            Some(previous)
        } else {
            None
        }
    }

    pub fn state(&self) -> &DailyRiskState {
        &self.state
    }

    pub fn is_halted(&self) -> bool {
        self.state.is_halted
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    /// Swap limits for a new session, keeping the daily PnL state
    pub fn set_limits(&mut self, limits: RiskLimits) -> Result<()> {
        limits.validate()?;
        self.offset = limits.offset()?;
        self.limits = limits;
        Ok(())
    }
}

use chrono::{DateTime, Duration, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

/// Daily PnL ledger gating new entries
///
/// One live instance; persisted after every mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyRiskState {
    pub trading_day_id: String,
    pub cumulative_pnl: f64,
    pub is_halted: bool,
}

impl DailyRiskState {
    pub fn new(trading_day_id: String) -> Self {
        Self {
            trading_day_id,
            cumulative_pnl: 0.0,
            is_halted: false,
        }
    }

    /// Reset for a later trading day
    ///
    /// Returns true only when `trading_day_id` is after the current one.
    /// Ids are `YYYY-MM-DD` and compare lexically; an earlier id (a late
    /// candle, a clock behind the feed) never moves the day back.
    pub fn roll(&mut self, trading_day_id: &str) -> bool {
        if trading_day_id <= self.trading_day_id.as_str() {
            return false;
        }
        self.trading_day_id = trading_day_id.to_string();
        self.cumulative_pnl = 0.0;
        self.is_halted = false;
        true
    }
}

/// Trading day containing `now`
///
/// Days start at `reset_hour` local time, so before the reset hour the
/// previous calendar date is still current.
pub fn trading_day_id(now: DateTime<Utc>, offset: FixedOffset, reset_hour: u32) -> String {
    let local = now.with_timezone(&offset) - Duration::hours(i64::from(reset_hour));
    local.format("%Y-%m-%d").to_string()
}

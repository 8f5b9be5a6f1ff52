// Risk management module
pub mod circuit_breakers;
pub mod daily;

pub use circuit_breakers::{RejectReason, RiskLimits, RiskManager, TradingWindow};
pub use daily::{trading_day_id, DailyRiskState};

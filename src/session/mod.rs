// Session controller
// One configuration-scoped trading run; ACTIVE -> ENDED is terminal

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::execution::{LedgerSettings, Position, PositionLedger, PositionStatus};
use crate::risk::RiskLimits;
use crate::strategy::StrategyParams;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Manual,
    Reconfigured,
    /// A position at an outermost level settled as a loss
    Breakout,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Manual => write!(f, "manual stop"),
            StopReason::Reconfigured => write!(f, "reconfigured"),
            StopReason::Breakout => write!(f, "range breakout"),
        }
    }
}

/// Everything fixed for the lifetime of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionParams {
    pub symbol: String,
    pub strategy: StrategyParams,
    pub risk: RiskLimits,
    pub ledger: LedgerSettings,
}

impl SessionParams {
    pub fn validate(&self) -> Result<()> {
        if self.symbol.trim().is_empty() {
            return Err(crate::error::EngineError::config("symbol must not be empty"));
        }
        self.strategy.validate()?;
        self.risk.validate()?;
        self.ledger.validate()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: Uuid,
    pub params: SessionParams,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub position_ids: Vec<Uuid>,
    pub is_active: bool,
    pub stop_reason: Option<StopReason>,
}

impl Session {
    pub fn new(params: SessionParams, now: DateTime<Utc>) -> Self {
        let session = Self {
            id: Uuid::new_v4(),
            params,
            start_time: now,
            end_time: None,
            position_ids: Vec::new(),
            is_active: true,
            stop_reason: None,
        };
        tracing::info!(session = %session.id, symbol = %session.params.symbol, "🚀 Session started");
        session
    }

    /// Record a new position; refused once the session has ended
    pub fn attach(&mut self, position_id: Uuid) -> bool {
        if !self.is_active {
            return false;
        }
        self.position_ids.push(position_id);
        true
    }

    /// Forget positions the ledger no longer keeps
    pub fn detach(&mut self, position_ids: &[Uuid]) {
        self.position_ids.retain(|id| !position_ids.contains(id));
    }

    /// End the session; returns false if it had already ended
    pub fn end(&mut self, reason: StopReason, now: DateTime<Utc>) -> bool {
        if !self.is_active {
            return false;
        }
        self.is_active = false;
        self.end_time = Some(now);
        self.stop_reason = Some(reason);
        tracing::info!(session = %self.id, reason = %reason, "🏁 Session ended");
        true
    }

    /// True when this settlement means the range broke
    pub fn is_breakout(&self, settled: &Position) -> bool {
        self.is_active
            && settled.session_id == self.id
            && settled.status == PositionStatus::Loss
            && settled.level_ref.is_outermost()
    }

    pub fn to_record(&self, ledger: &PositionLedger) -> SessionRecord {
        SessionRecord {
            id: self.id,
            params: self.params.clone(),
            start_time: self.start_time,
            end_time: self.end_time,
            positions: ledger.positions_for(&self.position_ids),
            is_active: self.is_active,
            stop_reason: self.stop_reason,
        }
    }

    /// Rebuild from a persisted record, handing back its positions for the ledger
    pub fn from_record(record: SessionRecord) -> (Self, Vec<Position>) {
        let session = Self {
            id: record.id,
            params: record.params,
            start_time: record.start_time,
            end_time: record.end_time,
            position_ids: record.positions.iter().map(|p| p.id).collect(),
            is_active: record.is_active,
            stop_reason: record.stop_reason,
        };
        (session, record.positions)
    }
}

/// Durable form of a session, with position snapshots embedded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: Uuid,
    pub params: SessionParams,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub positions: Vec<Position>,
    pub is_active: bool,
    pub stop_reason: Option<StopReason>,
}

impl SessionRecord {
    pub fn open_positions(&self) -> usize {
        self.positions.iter().filter(|p| p.is_open()).count()
    }

    pub fn net_pnl(&self) -> f64 {
        self.positions.iter().filter_map(|p| p.pnl).sum()
    }
}

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineError;
use crate::models::{Direction, LevelRef};
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionStatus {
    Open,
    Win,
    Loss,
}

/// Fixed-duration, fixed-payout contract
///
/// Mutated exactly once, at settlement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub session_id: Uuid,
    pub direction: Direction,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub expiry_time: DateTime<Utc>,
    pub amount: f64,
    pub status: PositionStatus,
    pub level_ref: LevelRef,
    pub order_id: Option<String>,
    pub exit_price: Option<f64>,
    pub exit_time: Option<DateTime<Utc>>,
    pub pnl: Option<f64>,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_open() && now >= self.expiry_time
    }
}

/// WIN/LOSS for a settlement price; an exact tie is a loss
pub fn settlement_outcome(direction: Direction, entry_price: f64, exit_price: f64) -> PositionStatus {
    let won = match direction {
        Direction::Long => exit_price > entry_price,
        Direction::Short => exit_price < entry_price,
    };
    if won {
        PositionStatus::Win
    } else {
        PositionStatus::Loss
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerSettings {
    pub holding_secs: u64,
    pub payout_ratio: f64,
    pub leverage: u32,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            holding_secs: 600,
            payout_ratio: 0.8,
            leverage: 1,
        }
    }
}

impl LedgerSettings {
    pub fn validate(&self) -> Result<()> {
        if self.holding_secs == 0 {
            return Err(EngineError::config("holding_secs must be non-zero"));
        }
        if !(self.payout_ratio > 0.0 && self.payout_ratio <= 1.0) {
            return Err(EngineError::config("payout_ratio must be within (0, 1]"));
        }
        if self.leverage == 0 {
            return Err(EngineError::config("leverage must be at least 1"));
        }
        Ok(())
    }
}

/// Dashboard counters over settled positions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerStats {
    pub total_settled: usize,
    pub wins: usize,
    pub losses: usize,
    pub open: usize,
    pub win_rate: f64,
    pub net_pnl: f64,
}

/// Owns every open and settled position
#[derive(Debug, Clone)]
pub struct PositionLedger {
    settings: LedgerSettings,
    positions: Vec<Position>,
}

impl PositionLedger {
    pub fn new(settings: LedgerSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            settings,
            positions: Vec::new(),
        })
    }

    /// Put back positions loaded from persistence
    ///
    /// Ids already present are skipped.
    pub fn restore(&mut self, positions: Vec<Position>) -> usize {
        let mut restored = 0;
        for position in positions {
            if self.get(position.id).is_some() {
                continue;
            }
            self.positions.push(position);
            restored += 1;
        }

        tracing::info!(
            restored,
            open = self.open_count(),
            "Restored positions from persistence"
        );
        restored
    }

    /// Create new position, expiring after the holding duration
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        &mut self,
        session_id: Uuid,
        direction: Direction,
        entry_price: f64,
        amount: f64,
        level_ref: LevelRef,
        entry_time: DateTime<Utc>,
        order_id: Option<String>,
    ) -> &Position {
        let position = Position {
            id: Uuid::new_v4(),
            session_id,
            direction,
            entry_price,
            entry_time,
            expiry_time: entry_time + Duration::seconds(self.settings.holding_secs as i64),
            amount,
            status: PositionStatus::Open,
            level_ref,
            order_id,
            exit_price: None,
            exit_time: None,
            pnl: None,
        };

        tracing::info!(
            position = %position.id,
            direction = %direction,
            entry = entry_price,
            amount,
            expiry = %position.expiry_time,
            "📈 Opened position"
        );

        self.positions.push(position);
        let idx = self.positions.len() - 1;
        &self.positions[idx]
    }

    pub fn get(&self, id: Uuid) -> Option<&Position> {
        self.positions.iter().find(|p| p.id == id)
    }

    /// Settle one position at `price`
    ///
    /// Returns Ok(None) if it was already settled, so repeated calls never
    /// double-count PnL.
    pub fn settle(
        &mut self,
        id: Uuid,
        price: f64,
        now: DateTime<Utc>,
    ) -> Result<Option<Position>> {
        let payout_ratio = self.settings.payout_ratio;
        let position = self
            .positions
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or(EngineError::PositionNotFound(id))?;

        if !position.is_open() {
            return Ok(None);
        }

        let status = settlement_outcome(position.direction, position.entry_price, price);
        let pnl = match status {
            PositionStatus::Win => position.amount * payout_ratio,
            _ => -position.amount,
        };

        position.status = status;
        position.exit_price = Some(price);
        position.exit_time = Some(now);
        position.pnl = Some(pnl);

        tracing::info!(
            position = %id,
            status = ?status,
            entry = position.entry_price,
            exit = price,
            pnl,
            "{} Settled position",
            if status == PositionStatus::Win { "✅" } else { "❌" }
        );

        Ok(Some(position.clone()))
    }

    /// Ids of open positions whose expiry has passed
    pub fn due(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        self.positions
            .iter()
            .filter(|p| p.is_due(now))
            .map(|p| p.id)
            .collect()
    }

    /// Settle every due position at the same price
    pub fn settle_due(&mut self, now: DateTime<Utc>, price: f64) -> Vec<Position> {
        let mut settled = Vec::new();
        for id in self.due(now) {
            if let Ok(Some(position)) = self.settle(id, price, now) {
                settled.push(position);
            }
        }
        settled
    }

    pub fn open_count(&self) -> usize {
        self.positions.iter().filter(|p| p.is_open()).count()
    }

    pub fn open_positions(&self) -> Vec<&Position> {
        self.positions.iter().filter(|p| p.is_open()).collect()
    }

    pub fn all_positions(&self) -> &[Position] {
        &self.positions
    }

    /// Snapshots of the given positions, in ledger order
    pub fn positions_for(&self, ids: &[Uuid]) -> Vec<Position> {
        self.positions
            .iter()
            .filter(|p| ids.contains(&p.id))
            .cloned()
            .collect()
    }

    pub fn stats(&self) -> LedgerStats {
        let mut stats = LedgerStats::default();
        for p in &self.positions {
            match p.status {
                PositionStatus::Open => stats.open += 1,
                PositionStatus::Win => stats.wins += 1,
                PositionStatus::Loss => stats.losses += 1,
            }
            stats.net_pnl += p.pnl.unwrap_or(0.0);
        }
        stats.total_settled = stats.wins + stats.losses;
        if stats.total_settled > 0 {
            stats.win_rate = stats.wins as f64 / stats.total_settled as f64;
        }
        stats
    }

    pub fn settings(&self) -> &LedgerSettings {
        &self.settings
    }

    /// Apply new settings to positions opened from now on
    pub fn set_settings(&mut self, settings: LedgerSettings) -> Result<()> {
        settings.validate()?;
        self.settings = settings;
        Ok(())
    }

    /// Drop settled positions that no session references any more
    pub fn forget(&mut self, ids: &[Uuid]) {
        self.positions
            .retain(|p| p.is_open() || !ids.contains(&p.id));
    }

    /// Keep at most `keep_settled` settled positions, oldest dropped first
    ///
    /// Open positions always stay. Returns the ids removed.
    pub fn compact(&mut self, keep_settled: usize) -> Vec<Uuid> {
        let settled = self.positions.iter().filter(|p| !p.is_open()).count();
        let mut excess = settled.saturating_sub(keep_settled);
        if excess == 0 {
            return Vec::new();
        }

        let mut dropped = Vec::with_capacity(excess);
        self.positions.retain(|p| {
            if excess > 0 && !p.is_open() {
                excess -= 1;
                dropped.push(p.id);
                false
            } else {
                true
            }
        });

        tracing::debug!(dropped = dropped.len(), kept = keep_settled, "Compacted settled positions");
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> PositionLedger {
        PositionLedger::new(LedgerSettings::default()).unwrap()
    }

    fn open_short(pm: &mut PositionLedger, now: DateTime<Utc>) -> Uuid {
        pm.open(
            Uuid::new_v4(),
            Direction::Short,
            3955.0,
            10.0,
            LevelRef::WeakResistance,
            now,
            None,
        )
        .id
    }

    #[test]
    fn test_open_position() {
        let mut pm = ledger();
        let now = Utc::now();
        let id = open_short(&mut pm, now);

        let position = pm.get(id).unwrap();
        assert_eq!(position.status, PositionStatus::Open);
        assert_eq!(position.expiry_time, now + Duration::seconds(600));
        assert_eq!(pm.open_count(), 1);
    }

    #[test]
    fn test_settlement_outcome() {
        assert_eq!(
            settlement_outcome(Direction::Long, 100.0, 101.0),
            PositionStatus::Win
        );
        assert_eq!(
            settlement_outcome(Direction::Short, 100.0, 99.0),
            PositionStatus::Win
        );
        assert_eq!(
            settlement_outcome(Direction::Short, 100.0, 101.0),
            PositionStatus::Loss
        );
        // Tie loses either way
        assert_eq!(
            settlement_outcome(Direction::Long, 100.0, 100.0),
            PositionStatus::Loss
        );
        assert_eq!(
            settlement_outcome(Direction::Short, 100.0, 100.0),
            PositionStatus::Loss
        );
    }

    #[test]
    fn test_short_loss_debits_stake() {
        let mut pm = ledger();
        let now = Utc::now();
        let id = open_short(&mut pm, now);

        let settled = pm
            .settle(id, 3960.0, now + Duration::seconds(600))
            .unwrap()
            .unwrap();
        assert_eq!(settled.status, PositionStatus::Loss);
        assert_eq!(settled.pnl, Some(-10.0));
        assert_eq!(settled.exit_price, Some(3960.0));
    }

    #[test]
    fn test_win_credits_payout() {
        let mut pm = ledger();
        let now = Utc::now();
        let id = open_short(&mut pm, now);
        let settled = pm.settle(id, 3940.0, now).unwrap().unwrap();
        assert_eq!(settled.pnl, Some(8.0));
    }

    #[test]
    fn test_settle_is_idempotent() {
        let mut pm = ledger();
        let now = Utc::now();
        let id = open_short(&mut pm, now);

        assert!(pm.settle(id, 3960.0, now).unwrap().is_some());
        assert!(pm.settle(id, 3900.0, now).unwrap().is_none());

        let position = pm.get(id).unwrap();
        assert_eq!(position.status, PositionStatus::Loss);
        assert_eq!(pm.stats().net_pnl, -10.0);
    }

    #[test]
    fn test_settle_unknown_position() {
        let mut pm = ledger();
        let result = pm.settle(Uuid::new_v4(), 100.0, Utc::now());
        assert!(matches!(result, Err(EngineError::PositionNotFound(_))));
    }

    #[test]
    fn test_due_and_settle_due() {
        let mut pm = ledger();
        let now = Utc::now();
        let early = open_short(&mut pm, now);
        let late = open_short(&mut pm, now + Duration::seconds(300));

        assert!(pm.due(now + Duration::seconds(599)).is_empty());
        assert_eq!(pm.due(now + Duration::seconds(600)), vec![early]);

        let settled = pm.settle_due(now + Duration::seconds(600), 3950.0);
        assert_eq!(settled.len(), 1);
        assert!(pm.get(late).unwrap().is_open());
        assert_eq!(pm.open_count(), 1);
    }

    #[test]
    fn test_stats() {
        let mut pm = ledger();
        let now = Utc::now();
        let a = open_short(&mut pm, now);
        let b = open_short(&mut pm, now);
        open_short(&mut pm, now);

        pm.settle(a, 3900.0, now).unwrap();
        pm.settle(b, 4000.0, now).unwrap();

        let stats = pm.stats();
        assert_eq!(stats.total_settled, 2);
        assert_eq!(stats.wins, 1);
        assert_eq!(stats.open, 1);
        assert_eq!(stats.win_rate, 0.5);
        assert!((stats.net_pnl - (8.0 - 10.0)).abs() < 1e-9);
    }

    #[test]
    fn test_restore_skips_known_ids() {
        let mut pm = ledger();
        let now = Utc::now();
        open_short(&mut pm, now);
        let snapshot = pm.all_positions().to_vec();

        let mut restored = ledger();
        assert_eq!(restored.restore(snapshot.clone()), 1);
        assert_eq!(restored.restore(snapshot), 0);
        assert_eq!(restored.open_count(), 1);
    }

    #[test]
    fn test_forget_keeps_open_positions() {
        let mut pm = ledger();
        let now = Utc::now();
        let settled = open_short(&mut pm, now);
        let open = open_short(&mut pm, now);
        pm.settle(settled, 3960.0, now).unwrap();

        pm.forget(&[settled, open]);
        assert!(pm.get(settled).is_none());
        assert!(pm.get(open).is_some());
    }

    #[test]
    fn test_compact_drops_oldest_settled() {
        let mut pm = ledger();
        let now = Utc::now();
        let oldest = open_short(&mut pm, now);
        let still_open = open_short(&mut pm, now + Duration::seconds(1));
        let middle = open_short(&mut pm, now + Duration::seconds(2));
        let newest = open_short(&mut pm, now + Duration::seconds(3));
        for id in [oldest, middle, newest] {
            pm.settle(id, 3960.0, now).unwrap();
        }

        assert!(pm.compact(3).is_empty());
        assert_eq!(pm.compact(1), vec![oldest, middle]);
        assert!(pm.get(still_open).is_some());
        assert!(pm.get(newest).is_some());
        assert_eq!(pm.all_positions().len(), 2);

        // Open positions are never counted or dropped
        assert!(pm.compact(0).contains(&newest));
        assert_eq!(pm.open_count(), 1);
    }

    #[test]
    fn test_invalid_settings() {
        let settings = LedgerSettings {
            payout_ratio: 1.5,
            ..LedgerSettings::default()
        };
        assert!(PositionLedger::new(settings).is_err());
    }
}

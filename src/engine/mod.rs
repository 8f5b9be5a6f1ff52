// Streaming decision engine
// Feed -> strategy -> risk -> ledger -> persistence, serialized behind one owner
pub mod runtime;

pub use runtime::{run_dispatcher, Runtime};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::EngineError;
use crate::events::EngineEvent;
use crate::execution::{OrderRequest, Position, PositionLedger, TradeExecutor};
use crate::models::{Candle, Signal, Tick};
use crate::persistence::PersistedState;
use crate::risk::{RejectReason, RiskManager};
use crate::session::{Session, SessionParams, StopReason};
use crate::strategy::Strategy;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub expiry_check_ms: u64,
    pub event_capacity: usize,
    pub max_session_history: usize,
    /// Settled positions kept in memory and in snapshots
    pub max_settled_positions: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            expiry_check_ms: 1000,
            event_capacity: 256,
            max_session_history: 50,
            max_settled_positions: 1000,
        }
    }
}

impl EngineSettings {
    pub fn validate(&self) -> Result<()> {
        if self.expiry_check_ms == 0 {
            return Err(EngineError::config("expiry_check_ms must be non-zero"));
        }
        if self.event_capacity == 0
            || self.max_session_history == 0
            || self.max_settled_positions == 0
        {
            return Err(EngineError::config(
                "event_capacity, max_session_history and max_settled_positions must be non-zero",
            ));
        }
        Ok(())
    }
}

/// Result of one serialized engine step
///
/// `snapshot` is set whenever durable state changed; it must be saved before
/// `events` are published.
#[derive(Debug, Default)]
pub struct StepOutput {
    pub events: Vec<EngineEvent>,
    pub snapshot: Option<PersistedState>,
}

impl StepOutput {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.snapshot.is_none()
    }
}

/// Per-step scratch collecting events and the dirty flag
#[derive(Default)]
struct Step {
    events: Vec<EngineEvent>,
    dirty: bool,
}

impl Step {
    fn emit(&mut self, event: EngineEvent) {
        self.events.push(event);
    }
}

pub struct Engine {
    params: SessionParams,
    strategy: Box<dyn Strategy>,
    risk: RiskManager,
    ledger: PositionLedger,
    sessions: Vec<Session>,
    executor: Arc<dyn TradeExecutor>,
    last_tick: Option<Tick>,
    price_is_fresh: bool,
    accepting: bool,
    max_session_history: usize,
    max_settled_positions: usize,
}

impl Engine {
    /// Fresh engine with a new session
    pub fn new(
        params: SessionParams,
        executor: Arc<dyn TradeExecutor>,
        settings: &EngineSettings,
        now: DateTime<Utc>,
    ) -> Result<(Self, StepOutput)> {
        Self::restore(params, executor, settings, None, now)
    }

    /// Engine resumed from persisted state
    ///
    /// The daily risk state is restored and rolled; OPEN positions go back
    /// into the ledger. The last active session resumes when its params
    /// match `params`, otherwise it ends as `Reconfigured`.
    pub fn restore(
        params: SessionParams,
        executor: Arc<dyn TradeExecutor>,
        settings: &EngineSettings,
        persisted: Option<PersistedState>,
        now: DateTime<Utc>,
    ) -> Result<(Self, StepOutput)> {
        params.validate()?;
        settings.validate()?;
        let strategy = params.strategy.build()?;

        let mut ledger = PositionLedger::new(params.ledger.clone())?;
        let mut sessions = Vec::new();
        let risk = match persisted {
            Some(state) => {
                for record in state.sessions {
                    let (session, positions) = Session::from_record(record);
                    ledger.restore(positions);
                    sessions.push(session);
                }
                RiskManager::with_state(params.risk.clone(), state.risk)?
            }
            None => RiskManager::new(params.risk.clone(), now)?,
        };

        let mut engine = Self {
            params,
            strategy,
            risk,
            ledger,
            sessions,
            executor,
            last_tick: None,
            price_is_fresh: false,
            accepting: true,
            max_session_history: settings.max_session_history,
            max_settled_positions: settings.max_settled_positions,
        };
        engine.compact_ledger();

        let mut step = Step {
            dirty: true,
            ..Step::default()
        };
        engine.roll_day(now, &mut step);

        // Only the newest active record may keep running
        let active: Vec<usize> = engine
            .sessions
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_active)
            .map(|(i, _)| i)
            .collect();
        let resume = active
            .last()
            .copied()
            .filter(|&i| engine.sessions[i].params == engine.params);

        for i in active {
            if Some(i) != resume {
                let session = &mut engine.sessions[i];
                if session.end(StopReason::Reconfigured, now) {
                    step.emit(EngineEvent::SessionEnded {
                        session_id: session.id,
                        reason: StopReason::Reconfigured,
                        at: now,
                    });
                }
            }
        }

        match resume {
            Some(i) => {
                engine.restore_cooldowns(i);
                let session = &engine.sessions[i];
                tracing::info!(session = %session.id, "♻️  Resuming persisted session");
            }
            None => engine.begin_session(now, &mut step),
        }

        let out = engine_output(&engine, step);
        Ok((engine, out))
    }

    /// Rebuild per-level cooldowns from the latest entry of each level
    fn restore_cooldowns(&mut self, session_idx: usize) {
        let positions = self
            .ledger
            .positions_for(&self.sessions[session_idx].position_ids);
        for position in positions {
            let newer = self
                .risk
                .last_trigger(position.level_ref)
                .map_or(true, |last| position.entry_time > last);
            if newer {
                self.risk.record_trigger(position.level_ref, position.entry_time);
            }
        }
    }

    fn compact_ledger(&mut self) {
        let dropped = self.ledger.compact(self.max_settled_positions);
        if dropped.is_empty() {
            return;
        }
        for session in &mut self.sessions {
            session.detach(&dropped);
        }
    }

    fn begin_session(&mut self, now: DateTime<Utc>, step: &mut Step) {
        let session = Session::new(self.params.clone(), now);
        step.emit(EngineEvent::SessionStarted {
            session_id: session.id,
            strategy: self.strategy.name().to_string(),
            at: now,
        });
        self.sessions.push(session);
        step.dirty = true;
        self.prune_history();
    }

    fn prune_history(&mut self) {
        let mut excess = self.sessions.len().saturating_sub(self.max_session_history);
        let mut forgotten: Vec<Uuid> = Vec::new();
        let ledger = &self.ledger;
        self.sessions.retain(|s| {
            let has_open = s
                .position_ids
                .iter()
                .any(|id| ledger.get(*id).map(|p| p.is_open()).unwrap_or(false));
            if excess > 0 && !s.is_active && !has_open {
                excess -= 1;
                forgotten.extend(s.position_ids.iter().copied());
                false
            } else {
                true
            }
        });
        if !forgotten.is_empty() {
            self.ledger.forget(&forgotten);
        }
    }

    /// End the current session and start a new one with `params`
    ///
    /// Invalid params are rejected before anything changes.
    pub fn reconfigure(&mut self, params: SessionParams, now: DateTime<Utc>) -> Result<StepOutput> {
        params.validate()?;
        let strategy = params.strategy.build()?;
        self.risk.set_limits(params.risk.clone())?;
        self.ledger.set_settings(params.ledger.clone())?;

        let mut step = Step::default();
        self.end_active(StopReason::Reconfigured, now, &mut step);

        self.strategy = strategy;
        self.params = params;
        self.risk.clear_cooldowns();
        self.accepting = true;
        self.begin_session(now, &mut step);

        Ok(engine_output(self, step))
    }

    /// Graceful stop: no new positions, open ones keep settling
    pub fn stop(&mut self, now: DateTime<Utc>) -> StepOutput {
        let mut step = Step::default();
        self.accepting = false;
        self.strategy.clear_pending();
        self.end_active(StopReason::Manual, now, &mut step);
        engine_output(self, step)
    }

    fn end_active(&mut self, reason: StopReason, now: DateTime<Utc>, step: &mut Step) {
        if let Some(session) = self.sessions.iter_mut().rev().find(|s| s.is_active) {
            if session.end(reason, now) {
                step.emit(EngineEvent::SessionEnded {
                    session_id: session.id,
                    reason,
                    at: now,
                });
                step.dirty = true;
            }
        }
    }

    fn roll_day(&mut self, now: DateTime<Utc>, step: &mut Step) {
        let was_halted = self.risk.is_halted();
        if let Some(previous_day) = self.risk.roll(now) {
            step.emit(EngineEvent::DayRolled {
                previous_day,
                trading_day: self.risk.state().trading_day_id.clone(),
            });
            if was_halted {
                step.emit(EngineEvent::HaltChanged {
                    halted: false,
                    daily_pnl: self.risk.state().cumulative_pnl,
                });
            }
            step.dirty = true;
        }
    }

    /// Settle every due position at `price`, applying PnL and breakout rules
    fn settle_due(&mut self, now: DateTime<Utc>, price: f64, step: &mut Step) {
        let settled = self.ledger.settle_due(now, price);
        if settled.is_empty() {
            return;
        }
        for position in settled {
            self.apply_settlement(position, now, step);
        }
        self.compact_ledger();
    }

    fn apply_settlement(&mut self, position: Position, now: DateTime<Utc>, step: &mut Step) {
        let pnl = position.pnl.unwrap_or(0.0);
        let tripped = self.risk.record_pnl(pnl);
        step.dirty = true;

        let breakout = self
            .sessions
            .iter()
            .rev()
            .find(|s| s.id == position.session_id)
            .map(|s| s.is_breakout(&position))
            .unwrap_or(false);

        step.emit(EngineEvent::PositionSettled {
            position,
            daily_pnl: self.risk.state().cumulative_pnl,
        });

        if tripped {
            self.strategy.clear_pending();
            step.emit(EngineEvent::HaltChanged {
                halted: true,
                daily_pnl: self.risk.state().cumulative_pnl,
            });
        }

        if breakout {
            tracing::warn!("💥 Outermost level lost, range considered broken");
            self.strategy.clear_pending();
            self.end_active(StopReason::Breakout, now, step);
        }
    }

    /// Process one live tick: settle what is due, then evaluate entries
    pub async fn on_tick(&mut self, tick: Tick) -> StepOutput {
        let now = tick.timestamp;
        let mut step = Step::default();

        self.roll_day(now, &mut step);
        self.settle_due(now, tick.price, &mut step);

        let prev = self.last_tick.replace(tick);
        self.price_is_fresh = true;

        if let Some(signal) = self.strategy.on_tick(&tick, prev.as_ref()) {
            self.handle_signal(signal, now, &mut step).await;
        }

        engine_output(self, step)
    }

    async fn handle_signal(&mut self, signal: Signal, now: DateTime<Utc>, step: &mut Step) {
        let session_id = match self.active_session() {
            Some(session) if self.accepting => session.id,
            _ => {
                step.emit(EngineEvent::SignalRejected {
                    signal,
                    reason: RejectReason::NoActiveSession,
                });
                return;
            }
        };

        if let Err(reason) = self.risk.admit(&signal, now, self.ledger.open_count()) {
            tracing::info!(
                direction = %signal.direction,
                level = %signal.level_ref,
                reason = %reason,
                "Signal rejected"
            );
            step.emit(EngineEvent::SignalRejected { signal, reason });
            return;
        }

        let order = OrderRequest {
            symbol: self.params.symbol.clone(),
            direction: signal.direction,
            stake: signal.stake,
            leverage: self.ledger.settings().leverage,
            reference_price: signal.trigger_price,
        };

        let fill = match self.executor.execute(&order).await {
            Ok(fill) => fill,
            Err(e) => {
                tracing::error!(error = %e, direction = %signal.direction, "Execution failed, no position opened");
                step.emit(EngineEvent::ExecutionFailed {
                    signal,
                    error: e.to_string(),
                });
                return;
            }
        };

        let position = self
            .ledger
            .open(
                session_id,
                signal.direction,
                fill.avg_price,
                signal.stake,
                signal.level_ref,
                now,
                Some(fill.order_id),
            )
            .clone();
        self.risk.record_trigger(signal.level_ref, now);
        if let Some(session) = self.active_session_mut() {
            session.attach(position.id);
        }
        step.dirty = true;

        tracing::info!(reason = %signal.reason, "🎯 Signal accepted");
        step.emit(EngineEvent::PositionOpened {
            position,
            reason: signal.reason,
        });
    }

    /// Fold a closed candle into the strategy
    ///
    /// A candle is stamped with its open time, which may sit before a reset
    /// the ticks of the same bucket already crossed. The day is rolled at the
    /// latest known instant instead.
    pub fn on_candle_closed(&mut self, candle: &Candle) -> StepOutput {
        let mut step = Step::default();
        let closed_at = self
            .last_tick
            .map_or(candle.open_time, |t| t.timestamp.max(candle.open_time));
        self.roll_day(closed_at, &mut step);

        self.strategy.on_candle_closed(candle);
        if self.risk.is_halted() || !self.accepting {
            self.strategy.clear_pending();
        }
        engine_output(self, step)
    }

    /// Warm the strategy from fetched history
    pub fn on_bootstrap(&mut self, candles: &[Candle]) {
        self.strategy.on_bootstrap(candles);
    }

    /// Timer path: settle due positions against the last live price
    ///
    /// Skipped while the feed is down; those positions settle on the first
    /// tick after reconnect instead.
    pub fn check_expiries(&mut self, now: DateTime<Utc>) -> StepOutput {
        let mut step = Step::default();
        self.roll_day(now, &mut step);

        if let (true, Some(tick)) = (self.price_is_fresh, self.last_tick) {
            self.settle_due(now, tick.price, &mut step);
        }
        engine_output(self, step)
    }

    pub fn on_feed_connected(&mut self) -> StepOutput {
        StepOutput {
            events: vec![EngineEvent::FeedStatus {
                connected: true,
                detail: None,
            }],
            snapshot: None,
        }
    }

    /// The last price is stale until a tick arrives on the next connection
    pub fn on_feed_down(&mut self, reason: &str) -> StepOutput {
        self.price_is_fresh = false;
        StepOutput {
            events: vec![EngineEvent::FeedStatus {
                connected: false,
                detail: Some(reason.to_string()),
            }],
            snapshot: None,
        }
    }

    pub fn snapshot(&self) -> PersistedState {
        PersistedState {
            risk: self.risk.state().clone(),
            sessions: self
                .sessions
                .iter()
                .map(|s| s.to_record(&self.ledger))
                .collect(),
        }
    }

    pub fn active_session(&self) -> Option<&Session> {
        self.sessions.iter().rev().find(|s| s.is_active)
    }

    fn active_session_mut(&mut self) -> Option<&mut Session> {
        self.sessions.iter_mut().rev().find(|s| s.is_active)
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn risk(&self) -> &RiskManager {
        &self.risk
    }

    pub fn ledger(&self) -> &PositionLedger {
        &self.ledger
    }

    pub fn params(&self) -> &SessionParams {
        &self.params
    }

    pub fn strategy_name(&self) -> &str {
        self.strategy.name()
    }

    pub fn open_count(&self) -> usize {
        self.ledger.open_count()
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting
    }
}

fn engine_output(engine: &Engine, step: Step) -> StepOutput {
    StepOutput {
        snapshot: step.dirty.then(|| engine.snapshot()),
        events: step.events,
    }
}

use chrono::{DateTime, Duration, TimeZone, Timelike, Utc};
use eventbot::engine::{EngineSettings, Runtime};
use eventbot::events::{EngineEvent, EventBus};
use eventbot::execution::{FeedEvent, LedgerSettings, PaperExecutor, PositionStatus};
use eventbot::notify::LogNotifier;
use eventbot::persistence::{JsonFileStore, MemoryStore, StateStore};
use eventbot::risk::{RejectReason, RiskLimits};
use eventbot::session::{SessionParams, StopReason};
use eventbot::strategy::{LevelParams, StrategyParams};
use eventbot::{Direction, Engine, LevelRef, Tick};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

// 10:00 local (UTC+8), inside the default 09-20 window
fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 2, 2, 0, 0).unwrap()
}

fn at(secs: i64) -> DateTime<Utc> {
    t0() + Duration::seconds(secs)
}

fn tick(secs: i64, price: f64) -> Tick {
    Tick::new(at(secs), price)
}

fn box_params(stake: f64, risk: RiskLimits) -> SessionParams {
    SessionParams {
        symbol: "ETHUSDT".to_string(),
        strategy: StrategyParams::StaticLevels(LevelParams::four(
            4000.0, 3950.0, 3900.0, 3850.0, stake,
        )),
        risk,
        ledger: LedgerSettings::default(),
    }
}

fn engine_with(params: SessionParams) -> Engine {
    Engine::new(
        params,
        Arc::new(PaperExecutor::new()),
        &EngineSettings::default(),
        t0(),
    )
    .unwrap()
    .0
}

fn rejections(events: &[EngineEvent]) -> Vec<RejectReason> {
    events
        .iter()
        .filter_map(|e| match e {
            EngineEvent::SignalRejected { reason, .. } => Some(*reason),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_weak_resistance_short_loses_after_holding_period() {
    let mut engine = engine_with(box_params(10.0, RiskLimits::default()));

    engine.on_tick(tick(0, 3900.0)).await;
    let out = engine.on_tick(tick(1, 3955.0)).await;
    match &out.events[..] {
        [EngineEvent::PositionOpened { position, .. }] => {
            assert_eq!(position.direction, Direction::Short);
            assert_eq!(position.entry_price, 3955.0);
            assert_eq!(position.level_ref, LevelRef::WeakResistance);
        }
        other => panic!("unexpected events {other:?}"),
    }

    // Not yet due
    engine.on_tick(tick(300, 3958.0)).await;
    assert_eq!(engine.open_count(), 1);

    let out = engine.on_tick(tick(601, 3960.0)).await;
    let settled = out
        .events
        .iter()
        .find_map(|e| match e {
            EngineEvent::PositionSettled { position, .. } => Some(position.clone()),
            _ => None,
        })
        .expect("position settled");
    assert_eq!(settled.status, PositionStatus::Loss);
    assert_eq!(settled.pnl, Some(-10.0));
    assert_eq!(engine.risk().state().cumulative_pnl, -10.0);

    // A weak level loss does not end the session
    assert!(engine.active_session().is_some());
}

#[tokio::test]
async fn test_three_losses_halt_until_next_trading_day() {
    let mut engine = engine_with(box_params(15.0, RiskLimits::default()));

    let mut opened = 0;
    for (cross_at, entry) in [(1, 3899.0), (100, 3898.0), (200, 3897.0)] {
        engine.on_tick(tick(cross_at - 1, 3910.0)).await;
        let out = engine.on_tick(tick(cross_at, entry)).await;
        if out
            .events
            .iter()
            .any(|e| matches!(e, EngineEvent::PositionOpened { .. }))
        {
            opened += 1;
        }
    }
    assert_eq!(opened, 3);
    assert_eq!(engine.open_count(), 3);

    // Each LONG settles below its entry
    engine.on_tick(tick(601, 3880.0)).await;
    engine.on_tick(tick(700, 3880.0)).await;
    let out = engine.on_tick(tick(800, 3880.0)).await;
    assert_eq!(engine.open_count(), 0);
    assert_eq!(engine.risk().state().cumulative_pnl, -45.0);
    assert!(engine.risk().is_halted());
    assert!(out.events.iter().any(|e| matches!(
        e,
        EngineEvent::HaltChanged { halted: true, .. }
    )));

    // Fourth otherwise valid signal the same day
    engine.on_tick(tick(900, 3910.0)).await;
    let out = engine.on_tick(tick(901, 3899.0)).await;
    assert_eq!(rejections(&out.events), vec![RejectReason::DailyLossHalt]);
    assert_eq!(engine.open_count(), 0);

    // Still halted later that day
    engine.on_tick(tick(5_000, 3910.0)).await;
    let out = engine.on_tick(tick(5_001, 3899.0)).await;
    assert_eq!(rejections(&out.events), vec![RejectReason::DailyLossHalt]);

    // 09:00 local next day resets the running total and lifts the halt
    let next_day = 23 * 3600;
    let out = engine.on_tick(tick(next_day, 3910.0)).await;
    assert!(out
        .events
        .iter()
        .any(|e| matches!(e, EngineEvent::DayRolled { .. })));
    assert!(!engine.risk().is_halted());
    assert_eq!(engine.risk().state().cumulative_pnl, 0.0);

    let out = engine.on_tick(tick(next_day + 1, 3899.0)).await;
    assert!(out
        .events
        .iter()
        .any(|e| matches!(e, EngineEvent::PositionOpened { .. })));
}

#[tokio::test]
async fn test_open_positions_never_exceed_cap() {
    let risk = RiskLimits {
        cooldown_secs: 0,
        max_open_positions: 2,
        ..RiskLimits::default()
    };
    let mut engine = engine_with(box_params(10.0, risk));

    let mut rejected = Vec::new();
    for i in 0..40 {
        let price = if i % 2 == 0 { 3940.0 } else { 3955.0 };
        let out = engine.on_tick(tick(i, price)).await;
        rejected.extend(rejections(&out.events));
        assert!(engine.open_count() <= 2);
    }

    assert_eq!(engine.open_count(), 2);
    assert!(rejected.contains(&RejectReason::MaxOpenPositions));
}

#[tokio::test]
async fn test_rising_path_fires_once_and_near_miss_never() {
    let mut engine = engine_with(box_params(10.0, RiskLimits::default()));

    // Approaches weak resistance without touching it
    for (i, price) in [3930.0, 3940.0, 3945.0, 3949.5, 3949.99].into_iter().enumerate() {
        let out = engine.on_tick(tick(i as i64, price)).await;
        assert!(out.events.is_empty());
    }

    // One crossing, then price keeps climbing beyond the level
    let mut opened = 0;
    for i in 0..120 {
        let price = 3950.0 + i as f64 * 0.1;
        let out = engine.on_tick(tick(10 + i, price)).await;
        opened += out
            .events
            .iter()
            .filter(|e| matches!(e, EngineEvent::PositionOpened { .. }))
            .count();
    }
    assert_eq!(opened, 1);
}

#[tokio::test]
async fn test_repeated_expiry_checks_do_not_double_count() {
    let mut engine = engine_with(box_params(10.0, RiskLimits::default()));
    engine.on_tick(tick(0, 3900.0)).await;
    engine.on_tick(tick(1, 3955.0)).await;
    engine.on_tick(tick(2, 3940.0)).await;

    let first = engine.check_expiries(at(601));
    assert_eq!(first.events.len(), 1);
    assert_eq!(engine.risk().state().cumulative_pnl, 8.0);

    assert!(engine.check_expiries(at(602)).is_empty());
    engine.on_tick(tick(603, 3990.0)).await;
    assert_eq!(engine.risk().state().cumulative_pnl, 8.0);
    assert_eq!(engine.ledger().stats().total_settled, 1);
}

#[tokio::test]
async fn test_restart_from_file_resumes_and_settles() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileStore::new(dir.path().join("state.json"));
    let params = box_params(10.0, RiskLimits::default());

    let mut engine = engine_with(params.clone());
    engine.on_tick(tick(0, 3900.0)).await;
    let out = engine.on_tick(tick(1, 3955.0)).await;
    store.save(out.snapshot.as_ref().unwrap()).await.unwrap();
    let session_id = engine.active_session().unwrap().id;

    let loaded = store.load().await.unwrap();
    assert_eq!(loaded.as_ref(), out.snapshot.as_ref());

    // Process restarts well after expiry
    let (mut restored, _) = Engine::restore(
        params,
        Arc::new(PaperExecutor::new()),
        &EngineSettings::default(),
        loaded,
        at(900),
    )
    .unwrap();
    assert_eq!(restored.active_session().unwrap().id, session_id);
    assert_eq!(restored.open_count(), 1);

    // Settles against the first live price
    restored.on_feed_connected();
    let out = restored.on_tick(tick(905, 3940.0)).await;
    assert_eq!(restored.open_count(), 0);
    assert_eq!(restored.risk().state().cumulative_pnl, 8.0);

    let snapshot = out.snapshot.unwrap();
    store.save(&snapshot).await.unwrap();
    let record = &store.load().await.unwrap().unwrap().sessions[0];
    assert_eq!(record.positions[0].status, PositionStatus::Win);
}

#[tokio::test]
async fn test_restart_with_new_levels_starts_new_session() {
    let params = box_params(10.0, RiskLimits::default());
    let mut engine = engine_with(params);
    engine.on_tick(tick(0, 3900.0)).await;
    engine.on_tick(tick(1, 3955.0)).await;
    let snapshot = engine.snapshot();

    let moved = SessionParams {
        strategy: StrategyParams::StaticLevels(LevelParams::two(4100.0, 3800.0, 10.0)),
        ..box_params(10.0, RiskLimits::default())
    };
    let (restored, out) = Engine::restore(
        moved,
        Arc::new(PaperExecutor::new()),
        &EngineSettings::default(),
        Some(snapshot),
        at(60),
    )
    .unwrap();

    assert_eq!(restored.sessions().len(), 2);
    assert!(out.events.iter().any(|e| matches!(
        e,
        EngineEvent::SessionEnded {
            reason: StopReason::Reconfigured,
            ..
        }
    )));
    // The superseded session's position is still tracked
    assert_eq!(restored.open_count(), 1);
}

#[tokio::test]
async fn test_runtime_graceful_stop_waits_for_settlement() {
    let start = Utc::now();
    // Keep the daily boundary far from the test's clock
    let risk = RiskLimits {
        trading_windows: vec![],
        utc_offset_hours: 0,
        daily_reset_hour: (start.hour() + 12) % 24,
        ..RiskLimits::default()
    };
    let params = box_params(10.0, risk);
    let settings = EngineSettings {
        expiry_check_ms: 50,
        ..EngineSettings::default()
    };
    let (engine, initial) =
        Engine::new(params, Arc::new(PaperExecutor::new()), &settings, start).unwrap();

    let store = Arc::new(MemoryStore::new());
    let bus = EventBus::new(64);
    let mut events = bus.subscribe();
    let runtime = Runtime::new(engine, store.clone(), bus, settings);

    let (go_tx, go_rx) = oneshot::channel::<()>();
    let (stop_tx, stop_rx) = mpsc::channel(2);

    let feed = move |tx: mpsc::Sender<FeedEvent>, mut shutdown: tokio::sync::watch::Receiver<bool>| async move {
        let _ = tx.send(FeedEvent::Connected).await;
        let _ = tx.send(FeedEvent::Tick(Tick::new(start, 3900.0))).await;
        let _ = tx
            .send(FeedEvent::Tick(Tick::new(start + Duration::seconds(1), 3955.0)))
            .await;
        if go_rx.await.is_ok() {
            let _ = tx
                .send(FeedEvent::Tick(Tick::new(
                    start + Duration::seconds(700),
                    3960.0,
                )))
                .await;
        }
        let _ = shutdown.changed().await;
    };

    let handle = tokio::spawn(runtime.run(feed, Box::new(LogNotifier), initial, stop_rx));

    // Wait for the entry
    loop {
        let event = tokio::time::timeout(std::time::Duration::from_secs(5), events.recv())
            .await
            .expect("event before timeout")
            .unwrap();
        if let EngineEvent::PositionOpened { .. } = event {
            break;
        }
    }

    stop_tx.send(()).await.unwrap();
    // Still waiting on the open position
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    assert!(!handle.is_finished());

    go_tx.send(()).unwrap();
    tokio::time::timeout(std::time::Duration::from_secs(5), handle)
        .await
        .expect("runtime stops once flat")
        .unwrap()
        .unwrap();

    let state = store.load().await.unwrap().unwrap();
    let session = &state.sessions[0];
    assert!(!session.is_active);
    assert_eq!(session.stop_reason, Some(StopReason::Manual));
    assert_eq!(session.positions[0].status, PositionStatus::Loss);
    assert_eq!(state.risk.cumulative_pnl, -10.0);
}

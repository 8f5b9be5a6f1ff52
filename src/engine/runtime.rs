use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};

use super::{Engine, EngineSettings, StepOutput};
use crate::events::EventBus;
use crate::execution::FeedEvent;
use crate::notify::{run_notifier, Notifier};
use crate::persistence::StateStore;
use crate::Result;

const FEED_CHANNEL_CAPACITY: usize = 1024;

/// Save each step's snapshot, then publish its events
///
/// Steps arrive in the order the engine produced them, so a report never
/// reaches a subscriber before the state it describes was handed to the store.
pub async fn run_dispatcher(
    mut rx: mpsc::UnboundedReceiver<StepOutput>,
    store: Arc<dyn StateStore>,
    bus: EventBus,
) {
    while let Some(output) = rx.recv().await {
        if let Some(snapshot) = &output.snapshot {
            if let Err(e) = store.save(snapshot).await {
                tracing::error!(error = %e, "Failed to persist state, continuing in memory");
            }
        }
        bus.publish_all(output.events);
    }
    tracing::debug!("Dispatcher drained");
}

async fn feed_reader_loop(
    engine: Arc<Mutex<Engine>>,
    mut rx: mpsc::Receiver<FeedEvent>,
    out: mpsc::UnboundedSender<StepOutput>,
) {
    while let Some(event) = rx.recv().await {
        let mut engine = engine.lock().await;
        let output = match event {
            FeedEvent::Tick(tick) => engine.on_tick(tick).await,
            FeedEvent::CandleClosed(candle) => engine.on_candle_closed(&candle),
            FeedEvent::Bootstrap(candles) => {
                engine.on_bootstrap(&candles);
                StepOutput::default()
            }
            FeedEvent::Connected => engine.on_feed_connected(),
            FeedEvent::Disconnected { reason } => engine.on_feed_down(&reason),
        };
        // Sent under the lock to keep step order
        if !output.is_empty() && out.send(output).is_err() {
            break;
        }
    }
}

async fn expiry_timer_loop(
    engine: Arc<Mutex<Engine>>,
    period: Duration,
    out: mpsc::UnboundedSender<StepOutput>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }

        let mut engine = engine.lock().await;
        let output = engine.check_expiries(Utc::now());
        if !output.is_empty() && out.send(output).is_err() {
            break;
        }
    }
}

/// Task wiring around one engine: feed reader, expiry timer, dispatcher, notifier
pub struct Runtime {
    engine: Arc<Mutex<Engine>>,
    store: Arc<dyn StateStore>,
    bus: EventBus,
    settings: EngineSettings,
}

impl Runtime {
    pub fn new(
        engine: Engine,
        store: Arc<dyn StateStore>,
        bus: EventBus,
        settings: EngineSettings,
    ) -> Self {
        Self {
            engine: Arc::new(Mutex::new(engine)),
            store,
            bus,
            settings,
        }
    }

    pub fn engine(&self) -> Arc<Mutex<Engine>> {
        self.engine.clone()
    }

    /// Run until stopped
    ///
    /// `spawn_feed` receives the event sender and the shutdown watch.
    /// The first message on `stop_rx` is a graceful stop (session ends, the
    /// call returns once no position is open); a second one, or the channel
    /// closing, is a hard stop.
    pub async fn run<F, Fut>(
        self,
        spawn_feed: F,
        notifier: Box<dyn Notifier>,
        initial: StepOutput,
        mut stop_rx: mpsc::Receiver<()>,
    ) -> Result<()>
    where
        F: FnOnce(mpsc::Sender<FeedEvent>, watch::Receiver<bool>) -> Fut + Send,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (feed_tx, feed_rx) = mpsc::channel(FEED_CHANNEL_CAPACITY);

        let notifier_task = tokio::spawn(run_notifier(self.bus.subscribe(), notifier));
        let dispatcher_task =
            tokio::spawn(run_dispatcher(out_rx, self.store.clone(), self.bus.clone()));
        if !initial.is_empty() {
            let _ = out_tx.send(initial);
        }

        let feed_task = tokio::spawn(spawn_feed(feed_tx, shutdown_rx.clone()));
        let reader_task = tokio::spawn(feed_reader_loop(
            self.engine.clone(),
            feed_rx,
            out_tx.clone(),
        ));
        let timer_task = tokio::spawn(expiry_timer_loop(
            self.engine.clone(),
            Duration::from_millis(self.settings.expiry_check_ms),
            out_tx.clone(),
            shutdown_rx,
        ));

        tracing::info!("✅ Engine running, press Ctrl+C to stop");

        let hard_stop = match stop_rx.recv().await {
            Some(()) => {
                {
                    let mut engine = self.engine.lock().await;
                    let output = engine.stop(Utc::now());
                    let _ = out_tx.send(output);
                    tracing::info!(
                        open = engine.open_count(),
                        "⚠️  Graceful stop: no new positions, waiting for open ones to settle (Ctrl+C again to exit now)"
                    );
                }
                self.wait_until_flat(&mut stop_rx).await
            }
            None => true,
        };

        let _ = shutdown_tx.send(true);

        if hard_stop {
            tracing::warn!("🛑 Hard stop, relying on persisted state for recovery");
            for task in [feed_task, reader_task, timer_task, dispatcher_task, notifier_task] {
                task.abort();
            }
            return Ok(());
        }

        let _ = feed_task.await;
        let _ = reader_task.await;
        let _ = timer_task.await;
        drop(out_tx);
        let _ = dispatcher_task.await;

        drop(self.bus);
        if tokio::time::timeout(Duration::from_secs(2), notifier_task)
            .await
            .is_err()
        {
            tracing::debug!("Notifier still subscribed elsewhere, not waiting");
        }

        tracing::info!("👋 Engine stopped");
        Ok(())
    }

    /// Returns false once every position settled, true on a second stop request
    async fn wait_until_flat(&self, stop_rx: &mut mpsc::Receiver<()>) -> bool {
        let mut poll = tokio::time::interval(Duration::from_millis(200));
        loop {
            tokio::select! {
                _ = stop_rx.recv() => return true,
                _ = poll.tick() => {
                    if self.engine.lock().await.open_count() == 0 {
                        return false;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EngineEvent;
    use crate::persistence::{MemoryStore, PersistedState};
    use crate::risk::DailyRiskState;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    /// Records the order of saves relative to published events
    struct OrderedStore {
        log: Arc<StdMutex<Vec<String>>>,
        inner: MemoryStore,
    }

    #[async_trait]
    impl StateStore for OrderedStore {
        async fn save(&self, state: &PersistedState) -> Result<()> {
            self.log
                .lock()
                .unwrap()
                .push(format!("save {}", state.risk.cumulative_pnl));
            self.inner.save(state).await
        }

        async fn load(&self) -> Result<Option<PersistedState>> {
            self.inner.load().await
        }
    }

    #[tokio::test]
    async fn test_dispatcher_persists_before_publishing() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let store = Arc::new(OrderedStore {
            log: log.clone(),
            inner: MemoryStore::new(),
        });
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        let (tx, out_rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_dispatcher(out_rx, store.clone(), bus.clone()));

        let mut risk = DailyRiskState::new("2024-05-02".to_string());
        risk.cumulative_pnl = -45.0;
        tx.send(StepOutput {
            events: vec![EngineEvent::HaltChanged {
                halted: true,
                daily_pnl: -45.0,
            }],
            snapshot: Some(PersistedState {
                risk,
                sessions: vec![],
            }),
        })
        .unwrap();

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, EngineEvent::HaltChanged { halted: true, .. }));
        // By the time the event is visible the snapshot is already stored
        assert_eq!(*log.lock().unwrap(), vec!["save -45".to_string()]);
        assert_eq!(
            store.load().await.unwrap().unwrap().risk.cumulative_pnl,
            -45.0
        );

        drop(tx);
        handle.await.unwrap();
    }
}

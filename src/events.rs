// Engine state-change events
// Published after the matching state snapshot has been handed to the store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::execution::Position;
use crate::models::Signal;
use crate::risk::RejectReason;
use crate::session::StopReason;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    SessionStarted {
        session_id: Uuid,
        strategy: String,
        at: DateTime<Utc>,
    },
    SessionEnded {
        session_id: Uuid,
        reason: StopReason,
        at: DateTime<Utc>,
    },
    PositionOpened {
        position: Position,
        reason: String,
    },
    PositionSettled {
        position: Position,
        daily_pnl: f64,
    },
    SignalRejected {
        signal: Signal,
        reason: RejectReason,
    },
    ExecutionFailed {
        signal: Signal,
        error: String,
    },
    HaltChanged {
        halted: bool,
        daily_pnl: f64,
    },
    DayRolled {
        previous_day: String,
        trading_day: String,
    },
    FeedStatus {
        connected: bool,
        detail: Option<String>,
    },
}

impl EngineEvent {
    /// Whether operators should be told about this event
    pub fn is_notable(&self) -> bool {
        !matches!(
            self,
            EngineEvent::SignalRejected { .. } | EngineEvent::FeedStatus { .. }
        )
    }

    /// Short human-readable title, used by notifiers
    pub fn title(&self) -> String {
        match self {
            EngineEvent::SessionStarted { .. } => "Session started".to_string(),
            EngineEvent::SessionEnded { reason, .. } => format!("Session ended ({reason})"),
            EngineEvent::PositionOpened { position, .. } => {
                format!("{} opened @ {:.2}", position.direction, position.entry_price)
            }
            EngineEvent::PositionSettled { position, .. } => format!(
                "{} {:?} {:+.2}",
                position.direction,
                position.status,
                position.pnl.unwrap_or(0.0)
            ),
            EngineEvent::SignalRejected { reason, .. } => format!("Signal rejected: {reason}"),
            EngineEvent::ExecutionFailed { .. } => "Execution failed".to_string(),
            EngineEvent::HaltChanged { halted: true, .. } => "Trading halted".to_string(),
            EngineEvent::HaltChanged { halted: false, .. } => "Trading resumed".to_string(),
            EngineEvent::DayRolled { trading_day, .. } => format!("New trading day {trading_day}"),
            EngineEvent::FeedStatus { connected: true, .. } => "Feed connected".to_string(),
            EngineEvent::FeedStatus { connected: false, .. } => "Feed disconnected".to_string(),
        }
    }

    pub fn body(&self) -> String {
        match self {
            EngineEvent::SessionStarted { session_id, strategy, at } => {
                format!("session {session_id} running {strategy} since {at}")
            }
            EngineEvent::SessionEnded { session_id, at, .. } => {
                format!("session {session_id} ended at {at}")
            }
            EngineEvent::PositionOpened { position, reason } => format!(
                "{} stake {:.2} at {}, expires {} ({reason})",
                position.level_ref, position.amount, position.entry_time, position.expiry_time
            ),
            EngineEvent::PositionSettled { position, daily_pnl } => format!(
                "entry {:.2} exit {:.2}, daily pnl {:.2}",
                position.entry_price,
                position.exit_price.unwrap_or(0.0),
                daily_pnl
            ),
            EngineEvent::SignalRejected { signal, .. } => {
                format!("{} at {} {:.2}", signal.direction, signal.level_ref, signal.trigger_price)
            }
            EngineEvent::ExecutionFailed { signal, error } => {
                format!("{} {:.2}: {error}", signal.direction, signal.trigger_price)
            }
            EngineEvent::HaltChanged { daily_pnl, .. } => format!("daily pnl {daily_pnl:.2}"),
            EngineEvent::DayRolled { previous_day, .. } => format!("closed out {previous_day}"),
            EngineEvent::FeedStatus { detail, .. } => detail.clone().unwrap_or_default(),
        }
    }
}

/// Fan-out of engine events to any number of subscribers
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Publish to current subscribers; having none is fine
    pub fn publish(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }

    pub fn publish_all(&self, events: impl IntoIterator<Item = EngineEvent>) {
        for event in events {
            self.publish(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bus_fans_out() {
        let bus = EventBus::new(16);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.publish(EngineEvent::HaltChanged {
            halted: true,
            daily_pnl: -45.0,
        });

        assert_eq!(a.recv().await.unwrap().title(), "Trading halted");
        assert_eq!(b.recv().await.unwrap().title(), "Trading halted");
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new(4);
        bus.publish(EngineEvent::FeedStatus {
            connected: true,
            detail: None,
        });
    }

    #[test]
    fn test_event_serializes_tagged() {
        let event = EngineEvent::DayRolled {
            previous_day: "2024-05-01".to_string(),
            trading_day: "2024-05-02".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "day_rolled");
        assert!(event.is_notable());
    }
}

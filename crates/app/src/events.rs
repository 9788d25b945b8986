//! In-process broadcast of station events. Each subscriber gets its own
//! bounded mailbox; slow subscribers lose the oldest events and re-sync
//! from the latest-status snapshot over HTTP.

use chrono::Local;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;

/// Closed tag set of the event protocol. Clients must tolerate unknown
/// tags, so new states can be added without breaking the browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventState {
    Ready,
    Processing,
    VoiceRecording,
    VoiceProcessing,
    VoiceUser,
    VoiceResponse,
    VoiceError,
    Complete,
    Error,
    Control,
}

#[derive(Debug, Clone, Serialize)]
pub struct StationEvent {
    pub state: EventState,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    pub timestamp: String,
}

impl StationEvent {
    fn new(state: EventState, message: impl Into<String>, data: Option<serde_json::Value>) -> Self {
        Self {
            state,
            message: message.into(),
            data,
            timestamp: Local::now().to_rfc3339(),
        }
    }
}

/// Per-subscriber mailbox depth before oldest-drop kicks in.
pub const MAILBOX_CAPACITY: usize = 64;

pub struct EventBus {
    tx: broadcast::Sender<StationEvent>,
    latest: RwLock<StationEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(MAILBOX_CAPACITY);
        Self {
            tx,
            latest: RwLock::new(StationEvent::new(EventState::Ready, "System Ready", None)),
        }
    }

    pub fn publish(
        &self,
        state: EventState,
        message: impl Into<String>,
        data: Option<serde_json::Value>,
    ) {
        let event = StationEvent::new(state, message, data);
        tracing::debug!(state = ?event.state, message = %event.message, "Event");
        *self.latest.write() = event.clone();
        // No subscribers is fine; the latest-status slot still updates.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StationEvent> {
        self.tx.subscribe()
    }

    /// Snapshot for late subscribers and `GET /api/status`.
    pub fn latest_status(&self) -> StationEvent {
        self.latest.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;

    #[tokio::test]
    async fn events_arrive_in_publish_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(EventState::Processing, "Analyzing Image...", None);
        bus.publish(EventState::Processing, "Vision Analysis...", None);
        bus.publish(EventState::Complete, "Analysis Complete!", None);

        assert_eq!(rx.try_recv().unwrap().message, "Analyzing Image...");
        assert_eq!(rx.try_recv().unwrap().message, "Vision Analysis...");
        assert_eq!(rx.try_recv().unwrap().state, EventState::Complete);
    }

    #[tokio::test]
    async fn latest_status_tracks_last_publish() {
        let bus = EventBus::new();
        assert_eq!(bus.latest_status().state, EventState::Ready);

        bus.publish(
            EventState::Error,
            "系统忙，请稍后",
            Some(serde_json::json!({"stage": "vision"})),
        );
        let latest = bus.latest_status();
        assert_eq!(latest.state, EventState::Error);
        assert_eq!(latest.message, "系统忙，请稍后");
    }

    #[tokio::test]
    async fn overflowing_mailbox_drops_oldest() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        for i in 0..(MAILBOX_CAPACITY + 8) {
            bus.publish(EventState::Control, format!("event-{}", i), None);
        }

        match rx.try_recv() {
            Err(TryRecvError::Lagged(missed)) => assert_eq!(missed as usize, 8),
            other => panic!("expected lag, got {:?}", other),
        }
        // After the lag the mailbox resumes from the oldest retained
        // event.
        let next = rx.try_recv().unwrap();
        assert_eq!(next.message, "event-8");
    }

    #[tokio::test]
    async fn serialization_uses_snake_case_tags() {
        let bus = EventBus::new();
        bus.publish(EventState::VoiceUser, "make it cheaper", None);
        let json = serde_json::to_value(bus.latest_status()).unwrap();
        assert_eq!(json["state"], "voice_user");
        assert_eq!(json["message"], "make it cheaper");
        assert!(json.get("data").is_none());
    }
}

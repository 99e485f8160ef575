//! # crew-events
//!
//! Broadcast event bus for [`AgentEvent`] fan-out.
//!
//! Multi-producer, multi-consumer with bounded buffering. Emission is
//! best-effort: a bus with no subscribers accepts and drops events, and
//! a slow subscriber lags (losing oldest events) instead of ever
//! blocking a producer. The protocol layer must never stall on
//! rendering.

#![deny(unsafe_code)]

use tokio::sync::broadcast;
use tracing::trace;

use crew_core::AgentEvent;

/// Default per-subscriber buffer capacity.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Fan-out broadcast bus for agent events.
#[derive(Debug)]
pub struct EventBus {
    tx: broadcast::Sender<AgentEvent>,
}

impl EventBus {
    /// Create a bus with the default buffer capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a bus with an explicit per-subscriber buffer capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Emit an event to all current subscribers.
    ///
    /// Never blocks and never fails: with no subscribers the event is
    /// dropped. Returns the number of subscribers the event reached.
    pub fn emit(&self, event: AgentEvent) -> usize {
        let event_type = event.event_type();
        match self.tx.send(event) {
            Ok(n) => n,
            Err(_) => {
                trace!(event_type, "event dropped, no subscribers");
                0
            }
        }
    }

    /// Subscribe to all events from this point on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.tx.subscribe()
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crew_core::events::BaseEvent;
    use crew_core::ConversationId;
    use tokio::sync::broadcast::error::RecvError;

    fn delta(text: &str) -> AgentEvent {
        AgentEvent::Delta {
            base: BaseEvent::now(&ConversationId::from("conv-1")),
            text: text.into(),
        }
    }

    #[test]
    fn emit_without_subscribers_is_dropped() {
        let bus = EventBus::new();
        assert_eq!(bus.emit(delta("a")), 0);
    }

    #[tokio::test]
    async fn fan_out_reaches_all_subscribers() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        assert_eq!(bus.emit(delta("a")), 2);

        let e1 = rx1.recv().await.unwrap();
        let e2 = rx2.recv().await.unwrap();
        assert_eq!(e1, e2);
        assert_eq!(e1.event_type(), "delta");
    }

    #[tokio::test]
    async fn slow_subscriber_lags_without_blocking_producer() {
        let bus = EventBus::with_capacity(2);
        let mut rx = bus.subscribe();

        // Overflow the buffer; every emit must still succeed.
        for i in 0..10 {
            assert_eq!(bus.emit(delta(&i.to_string())), 1);
        }

        // The first recv reports the lag, then delivery resumes with
        // the newest retained events.
        match rx.recv().await {
            Err(RecvError::Lagged(missed)) => assert!(missed >= 1),
            other => panic!("expected lag, got {other:?}"),
        }
        let next = rx.recv().await.unwrap();
        assert_eq!(next.event_type(), "delta");
    }

    #[tokio::test]
    async fn receiver_count_tracks_drops() {
        let bus = EventBus::new();
        assert_eq!(bus.receiver_count(), 0);
        let rx = bus.subscribe();
        assert_eq!(bus.receiver_count(), 1);
        drop(rx);
        assert_eq!(bus.receiver_count(), 0);
    }
}

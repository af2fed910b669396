//! Typed event surface for readiness consumers.
//!
//! Peripheral UI managers subscribe here; they never poll registry
//! internals. Delivery is best-effort broadcast: a slow subscriber can lag
//! and lose old events, which is acceptable because every event is also
//! reflected in the registry's current state.

use tokio::sync::broadcast;

/// Events emitted on capability state changes and fallback outcomes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    CapabilityReady { name: String },
    CapabilityFailed { name: String },
    FallbackSucceeded { key: String, url: String },
    FallbackExhausted { key: String, attempts: usize },
}

pub(crate) struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: EngineEvent) {
        // A send error only means there are no subscribers right now.
        let _ = self.sender.send(event);
    }
}

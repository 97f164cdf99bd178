use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Event key type
pub type EventKey = String;

/// Event payload: named fields such as `container_id` or `executor_id`.
pub type EventPayload = HashMap<String, serde_json::Value>;

/// Agent lifecycle event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEvent {
    /// Event key (e.g., "container.launched", "session.ended")
    pub key: EventKey,

    /// Event payload
    pub payload: EventPayload,

    /// Timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl AgentEvent {
    /// Create an event with a map payload
    pub fn with_map(key: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            key: key.into(),
            payload,
            timestamp: chrono::Utc::now(),
        }
    }
}

/// Event emitter
#[derive(Clone)]
pub struct EventEmitter {
    sender: Arc<broadcast::Sender<AgentEvent>>,
}

impl EventEmitter {
    /// Create a new event emitter
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Emit an event. Events with no subscribers are dropped.
    pub fn emit(&self, event: AgentEvent) {
        tracing::debug!(key = %event.key, "Agent event");
        let _ = self.sender.send(event);
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.sender.subscribe()
    }

    /// Subscribe to events with a filter
    pub fn subscribe_filtered(
        &self,
        filter: impl Fn(&AgentEvent) -> bool + Send + Sync + 'static,
    ) -> EventStream {
        EventStream {
            receiver: self.sender.subscribe(),
            filter: Arc::new(filter),
        }
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Event stream with filtering
pub struct EventStream {
    receiver: broadcast::Receiver<AgentEvent>,
    filter: Arc<dyn Fn(&AgentEvent) -> bool + Send + Sync>,
}

impl EventStream {
    /// Receive the next matching event. Lagged events are skipped.
    pub async fn recv(&mut self) -> Option<AgentEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if (self.filter)(&event) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Event catalog - predefined event keys
pub mod events {
    // Nested container events
    pub const CONTAINER_LAUNCHED: &str = "container.launched";
    pub const CONTAINER_LAUNCH_FAILED: &str = "container.launch_failed";
    pub const CONTAINER_DESTROYED: &str = "container.destroyed";

    // Session events
    pub const SESSION_STARTED: &str = "session.started";
    pub const SESSION_ENDED: &str = "session.ended";

    // Executor events
    pub const EXECUTOR_SUBSCRIBED: &str = "executor.subscribed";
    pub const EXECUTOR_UPDATE: &str = "executor.update";

    // Logging events
    pub const LOGGING_LEVEL_CHANGED: &str = "logging.level_changed";
}

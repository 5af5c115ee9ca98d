//! Domain event bus.
//!
//! The core never calls audit, memory, or lock-cleanup subsystems directly;
//! it emits events here and lets subscribers react. Emission never blocks
//! and a missing subscriber is not an error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// What happened to a resource lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockChange {
    Acquired,
    Released,
    ForceReleased,
}

/// Events the core emits onto the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum DomainEvent {
    #[serde(rename = "tool:executed")]
    ToolExecuted {
        session_id: String,
        scope: String,
        tool_name: String,
        error: bool,
        elapsed_ms: u64,
    },
    #[serde(rename = "agent:session.deleted")]
    SessionDeleted { session_id: String, scope: String },
    #[serde(rename = "agent:session.rolledBack")]
    SessionRolledBack {
        session_id: String,
        scope: String,
        checkpoint_id: String,
        truncated_from: usize,
    },
    #[serde(rename = "document:saved")]
    DocumentSaved {
        scope: String,
        doc_id: String,
        version: u64,
        session_id: Option<String>,
    },
    #[serde(rename = "resource:lock.changed")]
    LockChanged {
        scope: String,
        resource_type: String,
        resource_id: String,
        session_id: String,
        change: LockChange,
        fence_token: u64,
        at: DateTime<Utc>,
    },
}

/// Broadcast bus for [`DomainEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DomainEvent>,
}

impl EventBus {
    /// Create a bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.sender.subscribe()
    }

    /// Emit an event. Never blocks; dropped silently when nobody listens.
    pub fn emit(&self, event: DomainEvent) {
        if let Err(e) = self.sender.send(event) {
            tracing::trace!("No subscribers for domain event: {}", e);
        }
    }

    /// Current subscriber count, mostly useful in tests.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

//! Domain event system: lets observers follow a loop without coupling to it.
//!
//! Events are published when something interesting happens during a loop
//! execution. Subscribers (loggers, metrics, tests) react without the loop
//! knowing they exist.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A loop execution started from a trigger
    LoopStarted {
        conversation_id: String,
        task_preview: String,
        timestamp: DateTime<Utc>,
    },

    /// The model answered one request
    ResponseGenerated {
        conversation_id: String,
        model: String,
        iteration: u32,
        input_tokens: u64,
        output_tokens: u64,
        timestamp: DateTime<Utc>,
    },

    /// A tool invocation finished (successfully or not)
    ToolExecuted {
        tool_name: String,
        invocation_id: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A loop execution reached its terminal state
    LoopExited {
        conversation_id: String,
        reason: String,
        iterations: u32,
        elapsed_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// An error occurred
    ErrorOccurred {
        context: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

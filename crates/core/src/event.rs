//! Lifecycle events — subscription-based hooks around a run.
//!
//! The runner publishes these on the runner's bus and on the bus of the agent
//! they concern. Subscribers filter for what they care about.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Everything a lifecycle subscriber can observe.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// An agent is about to take its first turn.
    AgentStart {
        agent: String,
        timestamp: DateTime<Utc>,
    },

    /// The run completed while this agent held control.
    AgentEnd {
        agent: String,
        output: String,
        timestamp: DateTime<Utc>,
    },

    /// Control moved between agents.
    Handoff {
        from: String,
        to: String,
        timestamp: DateTime<Utc>,
    },

    /// A tool invocation was dispatched.
    ToolStart {
        agent: String,
        tool_name: String,
        call_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A tool invocation resolved.
    ToolEnd {
        agent: String,
        tool_name: String,
        call_id: String,
        success: bool,
        output: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for lifecycle events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<Arc<LifecycleEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: LifecycleEvent) {
        // No subscribers is fine.
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<LifecycleEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

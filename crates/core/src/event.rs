//! Domain event system — decoupled progress reporting.
//!
//! The loop publishes events as a task advances; the CLI (or anything else)
//! subscribes to render progress without the loop knowing about it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A task started running
    TaskStarted {
        task_id: String,
        model: String,
        max_steps: u32,
        tool_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// One inference finished
    InferenceCompleted {
        task_id: String,
        step: u32,
        model: String,
        tool_calls: usize,
        tokens_used: Option<u32>,
        timestamp: DateTime<Utc>,
    },

    /// A tool was executed
    ToolExecuted {
        task_id: String,
        call_id: String,
        tool_name: String,
        arguments: String,
        success: bool,
        /// Text rendering of the result, images elided
        summary: String,
        image_count: usize,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A captured image was written to the frame store
    FrameRecorded {
        task_id: String,
        sequence: u64,
        path: PathBuf,
        timestamp: DateTime<Utc>,
    },

    /// A task reached a terminal state or was aborted
    TaskFinished {
        task_id: String,
        outcome: String,
        steps: u32,
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

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(DomainEvent::ToolExecuted {
            task_id: "t1".into(),
            call_id: "call_1".into(),
            tool_name: "reset_view".into(),
            arguments: "{}".into(),
            success: true,
            summary: "ok".into(),
            image_count: 1,
            duration_ms: 42,
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            DomainEvent::ToolExecuted { tool_name, success, image_count, .. } => {
                assert_eq!(tool_name, "reset_view");
                assert!(success);
                assert_eq!(*image_count, 1);
            }
            _ => panic!("Expected ToolExecuted event"),
        }
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.publish(DomainEvent::TaskFinished {
            task_id: "t1".into(),
            outcome: "exhausted".into(),
            steps: 3,
            timestamp: Utc::now(),
        });
    }
}

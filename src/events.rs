//! Typed event envelopes and the broadcast fan-out
//!
//! Workflow tasks and the orchestrator publish progress and error
//! envelopes here; the WebSocket layer subscribes and forwards the ones
//! matching its session. Publishing with no subscribers is a no-op.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

/// A typed event pushed to WebSocket clients
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    /// Session the event belongs to, used for subscriber filtering
    #[serde(skip)]
    pub session_id: String,
    /// Event kind ("planning_start", "final_plan", "error", ...)
    #[serde(rename = "type")]
    pub event_type: String,
    /// Human-readable event text
    pub content: String,
    /// Emission timestamp
    pub timestamp: DateTime<Utc>,
    /// Optional structured payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

impl Envelope {
    /// Creates an envelope stamped with the current time
    pub fn new(
        session_id: impl Into<String>,
        event_type: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            event_type: event_type.into(),
            content: content.into(),
            timestamp: Utc::now(),
            context: None,
        }
    }

    /// Attaches a structured payload
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }
}

/// Broadcast channel for event envelopes
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Envelope>,
}

impl EventBus {
    /// Creates a bus buffering up to `capacity` in-flight envelopes
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an envelope; dropped silently when nobody listens
    pub fn publish(&self, envelope: Envelope) {
        let _ = self.sender.send(envelope);
    }

    /// Subscribes to all envelopes published after this call
    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

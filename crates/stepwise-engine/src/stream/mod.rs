pub mod forwarder;
pub mod transform;

use std::sync::Arc;

use serde_json::Value;

use stepwise_core::stream::StreamEvent;

pub use forwarder::{EventForwarder, ForwardOptions, ForwardOutcome};
pub use transform::to_stream_part;

/// Handle steps use to publish sub-agent progress.
///
/// Detached emitters (non-streaming executions) accept and discard events.
#[derive(Clone, Default)]
pub struct EventEmitter {
    forwarder: Option<Arc<EventForwarder>>,
}

impl EventEmitter {
    pub fn new(forwarder: Arc<EventForwarder>) -> Self {
        Self {
            forwarder: Some(forwarder),
        }
    }

    pub fn detached() -> Self {
        Self::default()
    }

    pub fn is_attached(&self) -> bool {
        self.forwarder.is_some()
    }

    /// Publish one event. Never fails; see [`ForwardOutcome`].
    pub async fn emit(&self, event: StreamEvent) -> Option<ForwardOutcome> {
        match &self.forwarder {
            Some(forwarder) => Some(forwarder.forward_event(event).await),
            None => None,
        }
    }

    /// Publish an untrusted event object.
    pub async fn emit_raw(&self, raw: &Value) -> Option<ForwardOutcome> {
        match &self.forwarder {
            Some(forwarder) => Some(forwarder.forward(raw).await),
            None => None,
        }
    }
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("attached", &self.is_attached())
            .finish()
    }
}

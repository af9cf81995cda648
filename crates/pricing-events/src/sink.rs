//! Event sink abstraction and in-memory implementation

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::types::PricingEvent;

/// Event sink error types.
///
/// Emission is fire-and-forget at call sites; these errors exist for
/// sink implementations and tests, not for evaluation control flow.
#[derive(Debug, Error)]
pub enum EventSinkError {
    /// No receiver is listening
    #[error("channel closed")]
    ChannelClosed,
}

/// Fire-and-forget event sink.
///
/// Implementations must never block the caller on downstream delivery.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emit an event.
    ///
    /// Best-effort: delivery failures are logged by the implementation
    /// and never surfaced to the caller.
    async fn emit(&self, event: PricingEvent);
}

/// In-memory broadcast-backed sink.
///
/// Suitable for single-process applications and tests. Events published
/// with no active subscriber are dropped silently, which is the expected
/// fire-and-forget behavior.
pub struct MemoryEventSink {
    sender: broadcast::Sender<PricingEvent>,
}

impl std::fmt::Debug for MemoryEventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEventSink").finish()
    }
}

impl MemoryEventSink {
    /// Create a sink with the default channel capacity.
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Create a sink with a custom channel capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to all emitted events.
    pub fn subscribe(&self) -> broadcast::Receiver<PricingEvent> {
        self.sender.subscribe()
    }

    /// Shareable handle.
    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }
}

impl Default for MemoryEventSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventSink for MemoryEventSink {
    async fn emit(&self, event: PricingEvent) {
        if let Err(err) = self.sender.send(event) {
            tracing::debug!("event dropped, no subscribers: {err}");
        }
    }
}

/// Sink that discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

#[async_trait]
impl EventSink for NoopEventSink {
    async fn emit(&self, _event: PricingEvent) {}
}

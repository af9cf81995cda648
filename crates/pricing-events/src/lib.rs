//! # Pricing Events
//!
//! Fire-and-forget event notifications for the pricing platform.
//!
//! ## Overview
//!
//! The pricing-events crate handles:
//! - **Event Types**: Strongly-typed pricing lifecycle events
//! - **Event Sink**: Non-blocking publish abstraction
//! - **In-Memory Sink**: Broadcast-backed sink for single-process apps and tests
//!
//! Evaluation logic never blocks on delivery: [`EventSink::emit`] is
//! best-effort and failures are logged, not propagated.
//!
//! ## Event Topics
//!
//! - `pricing.created`
//! - `pricing.activated`
//! - `pricing.archived`
//! - `service.disabled`
//!
//! ## Usage
//!
//! ```rust
//! use pricing_events::{EventSink, MemoryEventSink, PricingEvent, PricingEventKind};
//! use uuid::Uuid;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let sink = MemoryEventSink::new();
//! let mut sub = sink.subscribe();
//!
//! let event = PricingEvent::new(
//!     PricingEventKind::PricingArchived,
//!     Uuid::now_v7(),
//!     "acme",
//!     serde_json::json!({ "version": "1.0.0" }),
//! );
//! sink.emit(event).await;
//!
//! let received = sub.recv().await.unwrap();
//! assert_eq!(received.topic(), "pricing.archived");
//! # }
//! ```

pub mod sink;
pub mod types;

pub use sink::{EventSink, MemoryEventSink, NoopEventSink};
pub use types::{PricingEvent, PricingEventKind};

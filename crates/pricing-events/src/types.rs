//! Event types for pricing lifecycle notifications

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of pricing lifecycle event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PricingEventKind {
    /// A new pricing version was published
    PricingCreated,
    /// An archived pricing version was re-activated
    PricingActivated,
    /// An active pricing version was archived
    PricingArchived,
    /// A service was disabled or removed
    ServiceDisabled,
}

impl PricingEventKind {
    /// Topic string for this event kind.
    pub fn topic(&self) -> &'static str {
        match self {
            PricingEventKind::PricingCreated => "pricing.created",
            PricingEventKind::PricingActivated => "pricing.activated",
            PricingEventKind::PricingArchived => "pricing.archived",
            PricingEventKind::ServiceDisabled => "service.disabled",
        }
    }
}

/// A pricing lifecycle event.
///
/// Events are notifications only: no consumer of the evaluation engine
/// depends on their delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingEvent {
    /// Unique event ID
    pub id: Uuid,

    /// Event kind
    pub kind: PricingEventKind,

    /// Organization context
    pub organization_id: Uuid,

    /// Service the event concerns
    pub service_name: String,

    /// When the event was created
    pub timestamp: DateTime<Utc>,

    /// Event payload (version, fallback subscription, ...)
    pub payload: serde_json::Value,
}

impl PricingEvent {
    /// Create a new event.
    pub fn new(
        kind: PricingEventKind,
        organization_id: Uuid,
        service_name: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            kind,
            organization_id,
            service_name: service_name.into(),
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Topic for this event.
    pub fn topic(&self) -> &'static str {
        self.kind.topic()
    }

    /// Parse the payload into a specific type.
    pub fn parse_payload<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

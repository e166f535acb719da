//! Inbound events.
//!
//! An event is created by a dispatch front and handed to the processor exactly
//! once. Its identifier is the idempotency key for the whole pipeline.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Named attributes carried by an event or produced by enrichment.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Globally unique event identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Assign a fresh identifier, for transports that carry none of their own
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Empty or whitespace-only identifiers cannot key anything
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EventId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for EventId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// An immutable record received from a transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    id: EventId,
    payload: Payload,
    created_at: DateTime<Utc>,
}

impl Event {
    /// Create an event stamped with the current time
    pub fn new(id: impl Into<EventId>, payload: Payload) -> Self {
        Self {
            id: id.into(),
            payload,
            created_at: Utc::now(),
        }
    }

    /// Keep the creation time reported by the transport
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn id(&self) -> &EventId {
        &self.id
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Check the event is well-formed enough to enter the pipeline
    pub fn validate(&self) -> Result<(), InvalidEvent> {
        if self.id.is_blank() {
            return Err(InvalidEvent::EmptyId);
        }
        if self.payload.is_empty() {
            return Err(InvalidEvent::EmptyPayload);
        }
        Ok(())
    }
}

/// Reasons an event is rejected before any external call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InvalidEvent {
    #[error("event id is empty")]
    EmptyId,

    #[error("event payload is empty")]
    EmptyPayload,
}

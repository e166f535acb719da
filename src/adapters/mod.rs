//! Capability interfaces for external systems.
//!
//! The processor only ever sees these traits. Enrichment providers and storage
//! engines plug in by implementing them; nothing in `core` names a concrete
//! type.

pub mod http;
pub mod jsonl;
pub mod memory;
pub mod sqlite;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{EnrichedEvent, EnrichmentRequest, EnrichmentResponse};

pub use http::HttpEnricher;
pub use jsonl::JsonlStore;
pub use memory::{MemoryStore, ScriptedEnricher, StaticEnricher};
pub use sqlite::SqliteStore;

/// How the processor should treat a failed capability call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Worth retrying: timeouts, dropped connections, busy backends
    Transient,

    /// Explicit rejection; retrying cannot help
    Permanent,
}

/// Failure reported by an enricher or a store.
///
/// The classification lives in the variant, never in the message text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("permanent failure: {0}")]
    Permanent(String),

    #[error("call timed out after {after:?}")]
    TimedOut { after: Duration },
}

impl CapabilityError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transient(_) | Self::TimedOut { .. } => ErrorKind::Transient,
            Self::Permanent(_) => ErrorKind::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

/// Enrichment capability.
///
/// Called concurrently from many processor tasks. Implementations only see the
/// request, so they cannot mutate the originating event.
#[async_trait]
pub trait Enricher: Send + Sync {
    /// Human-readable provider name
    fn name(&self) -> &str;

    /// Fetch supplementary attributes for one event
    async fn enrich(
        &self,
        request: &EnrichmentRequest,
    ) -> Result<EnrichmentResponse, CapabilityError>;
}

/// Store capability.
///
/// Must be idempotent on the event id: storing the same enriched event twice
/// leaves exactly one record. A record is either fully visible or absent.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Human-readable backend name
    fn name(&self) -> &str;

    /// Durably persist one enriched event
    async fn store(&self, event: &EnrichedEvent) -> Result<(), CapabilityError>;
}

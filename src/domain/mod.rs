//! Domain types for the enrichment pipeline.
//!
//! This module contains the core data structures:
//! - Event: Immutable inbound record keyed by `EventId`
//! - Enrichment: Request/response exchanged with a provider, and the merged result
//! - Outcome: Terminal result of processing one event

pub mod enrichment;
pub mod events;
pub mod outcome;

// Re-export commonly used types
pub use enrichment::{EnrichedEvent, EnrichmentRequest, EnrichmentResponse};
pub use events::{Event, EventId, InvalidEvent, Payload};
pub use outcome::Outcome;

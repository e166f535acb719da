//! enrichr - Idempotent event enrichment pipeline
//!
//! Takes inbound events, asks an enrichment provider for supplementary
//! attributes, merges them into the payload and persists the result, with
//! bounded retries, per-call timeouts, deduplication and admission control.
//!
//! # Architecture
//!
//! The processor is written against two capability traits:
//! - `Enricher`: fetches attributes for one event
//! - `EventStore`: persists one enriched event, idempotent on the event id
//!
//! Every event ends in exactly one `Outcome`. Redelivering an event is always
//! safe: recent outcomes are replayed from the dedup window, older ones are
//! absorbed by the store's idempotency.
//!
//! # Modules
//!
//! - `adapters`: Capability traits and implementations (HTTP, JSONL, SQLite, memory)
//! - `core`: Event processor, dedup window, admission, retry policy
//! - `dispatch`: Transport fronts (newline-delimited JSON)
//! - `domain`: Data structures (Event, EnrichedEvent, Outcome)
//! - `config`: Layered configuration
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Enrich events from a file into a SQLite store
//! enrichr run --input events.jsonl --store sqlite --attr tax_rate=0.1
//!
//! # Show what was stored
//! enrichr records --store sqlite
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod dispatch;
pub mod domain;

// Re-export main types at crate root for convenience
pub use adapters::{CapabilityError, Enricher, ErrorKind, EventStore};
pub use core::{EventProcessor, ProcessorConfig, RetryPolicy};
pub use dispatch::LineDispatcher;
pub use domain::{EnrichedEvent, EnrichmentRequest, EnrichmentResponse, Event, EventId, Outcome, Payload};

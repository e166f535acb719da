//! Core orchestration logic.
//!
//! This module contains:
//! - Processor: Validate, enrich, merge, store, per event
//! - Dedup: Recent outcomes and per-event locks
//! - Admission: Concurrency limit with a bounded wait queue
//! - Retry/Settings: Backoff policy and processor limits

pub mod admission;
pub mod dedup;
pub mod processor;
pub mod retry;
pub mod settings;
pub mod stats;

// Re-export commonly used types
pub use admission::Admission;
pub use dedup::DedupWindow;
pub use processor::EventProcessor;
pub use retry::RetryPolicy;
pub use settings::{ConfigError, ProcessorConfig};
pub use stats::{ProcessorStats, StatsSnapshot};

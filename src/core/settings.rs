//! Processor settings and their validation.
//!
//! Bounds every resource the processor can consume:
//! - Retries and backoff per capability call
//! - Per-call timeout
//! - Dedup window lifetime
//! - In-flight and queued events

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::retry::RetryPolicy;

/// Settings for one `EventProcessor`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Retry policy shared by the enrichment and store phases
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Timeout for each enrichment or store call (default: 10s)
    #[serde(default = "default_call_timeout")]
    pub call_timeout_ms: u64,

    /// How long a recorded outcome answers repeat deliveries (default: 5 min)
    #[serde(default = "default_dedup_ttl")]
    pub dedup_ttl_ms: u64,

    /// Maximum events processed at once (default: 64)
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Maximum events waiting for a slot before new ones are turned away (default: 1024)
    #[serde(default = "default_max_queued")]
    pub max_queued: usize,
}

fn default_call_timeout() -> u64 {
    10_000
}
fn default_dedup_ttl() -> u64 {
    300_000
}
fn default_max_in_flight() -> usize {
    64
}
fn default_max_queued() -> usize {
    1024
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            call_timeout_ms: default_call_timeout(),
            dedup_ttl_ms: default_dedup_ttl(),
            max_in_flight: default_max_in_flight(),
            max_queued: default_max_queued(),
        }
    }
}

impl ProcessorConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_millis(self.dedup_ttl_ms)
    }

    /// Reject settings the processor cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_in_flight == 0 {
            return Err(ConfigError::NoConcurrency);
        }
        if self.call_timeout_ms == 0 {
            return Err(ConfigError::ZeroDuration {
                field: "call_timeout_ms",
            });
        }
        if self.dedup_ttl_ms == 0 {
            return Err(ConfigError::ZeroDuration {
                field: "dedup_ttl_ms",
            });
        }
        // Negated so NaN is rejected too
        if !(self.retry.backoff_multiplier >= 1.0) {
            return Err(ConfigError::ShrinkingBackoff {
                multiplier: self.retry.backoff_multiplier,
            });
        }
        if self.retry.max_delay_ms < self.retry.initial_delay_ms {
            return Err(ConfigError::InvertedBackoff {
                initial_ms: self.retry.initial_delay_ms,
                max_ms: self.retry.max_delay_ms,
            });
        }
        Ok(())
    }
}

/// Invalid processor settings
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("max_in_flight must be at least 1")]
    NoConcurrency,

    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },

    #[error("backoff_multiplier must be at least 1.0, got {multiplier}")]
    ShrinkingBackoff { multiplier: f64 },

    #[error("max_delay_ms ({max_ms}) is below initial_delay_ms ({initial_ms})")]
    InvertedBackoff { initial_ms: u64, max_ms: u64 },
}

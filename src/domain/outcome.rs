//! Terminal results of processing one event.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Result of `EventProcessor::process`, reported back to the dispatch front.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Enriched and durably stored
    Stored,

    /// Malformed input, rejected before any external call
    RejectedInvalid,

    /// Enrichment failed permanently or exhausted its retries
    FailedEnrichment,

    /// Storage failed permanently or exhausted its retries
    FailedStore,

    /// Concurrency limit and wait queue are both full
    Overloaded,
}

impl Outcome {
    pub const ALL: [Outcome; 5] = [
        Outcome::Stored,
        Outcome::RejectedInvalid,
        Outcome::FailedEnrichment,
        Outcome::FailedStore,
        Outcome::Overloaded,
    ];

    /// Whether this outcome is kept in the dedup window.
    ///
    /// Overloaded is a capacity signal and invalid events may carry no usable
    /// key, so neither is recorded.
    pub fn is_recorded(self) -> bool {
        matches!(
            self,
            Outcome::Stored | Outcome::FailedEnrichment | Outcome::FailedStore
        )
    }

    /// Whether a transport should consider redelivering the event later
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Outcome::FailedEnrichment | Outcome::FailedStore | Outcome::Overloaded
        )
    }

    /// HTTP-style status for transports that speak in status codes
    pub fn status_code(self) -> u16 {
        match self {
            Outcome::Stored => 201,
            Outcome::RejectedInvalid => 400,
            Outcome::FailedStore => 500,
            Outcome::FailedEnrichment => 502,
            Outcome::Overloaded => 503,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Stored => "stored",
            Outcome::RejectedInvalid => "rejected_invalid",
            Outcome::FailedEnrichment => "failed_enrichment",
            Outcome::FailedStore => "failed_store",
            Outcome::Overloaded => "overloaded",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_processing_results_are_recorded() {
        assert!(Outcome::Stored.is_recorded());
        assert!(Outcome::FailedEnrichment.is_recorded());
        assert!(Outcome::FailedStore.is_recorded());
        assert!(!Outcome::RejectedInvalid.is_recorded());
        assert!(!Outcome::Overloaded.is_recorded());
    }

    #[test]
    fn test_status_codes_are_distinct() {
        let mut codes: Vec<u16> = Outcome::ALL.iter().map(|o| o.status_code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), Outcome::ALL.len());
    }

    #[test]
    fn test_serde_matches_display() {
        for outcome in Outcome::ALL {
            let json = serde_json::to_string(&outcome).unwrap();
            assert_eq!(json, format!("\"{}\"", outcome));
        }
    }
}

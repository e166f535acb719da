//! Counters describing what a processor has done.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::domain::Outcome;

/// Tracks calls and results across every event
#[derive(Debug, Default)]
pub struct ProcessorStats {
    stored: AtomicU64,
    rejected_invalid: AtomicU64,
    failed_enrichment: AtomicU64,
    failed_store: AtomicU64,
    overloaded: AtomicU64,
    dedup_hits: AtomicU64,
    enrich_calls: AtomicU64,
    store_calls: AtomicU64,
    retries: AtomicU64,
}

impl ProcessorStats {
    pub fn record_outcome(&self, outcome: Outcome) {
        let counter = match outcome {
            Outcome::Stored => &self.stored,
            Outcome::RejectedInvalid => &self.rejected_invalid,
            Outcome::FailedEnrichment => &self.failed_enrichment,
            Outcome::FailedStore => &self.failed_store,
            Outcome::Overloaded => &self.overloaded,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dedup_hit(&self) {
        self.dedup_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_enrich_call(&self) {
        self.enrich_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_call(&self) {
        self.store_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            stored: self.stored.load(Ordering::Relaxed),
            rejected_invalid: self.rejected_invalid.load(Ordering::Relaxed),
            failed_enrichment: self.failed_enrichment.load(Ordering::Relaxed),
            failed_store: self.failed_store.load(Ordering::Relaxed),
            overloaded: self.overloaded.load(Ordering::Relaxed),
            dedup_hits: self.dedup_hits.load(Ordering::Relaxed),
            enrich_calls: self.enrich_calls.load(Ordering::Relaxed),
            store_calls: self.store_calls.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ProcessorStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub stored: u64,
    pub rejected_invalid: u64,
    pub failed_enrichment: u64,
    pub failed_store: u64,
    pub overloaded: u64,
    pub dedup_hits: u64,
    pub enrich_calls: u64,
    pub store_calls: u64,
    pub retries: u64,
}

impl StatsSnapshot {
    /// Outcomes produced by full processing runs (dedup hits excluded)
    pub fn processed(&self) -> u64 {
        self.stored + self.failed_enrichment + self.failed_store
    }
}

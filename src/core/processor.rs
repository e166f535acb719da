//! Event processor: validate, enrich, merge, store.
//!
//! Coordinates the two capability calls for each event with retry handling,
//! per-call timeouts, deduplication and admission control. Depends only on the
//! `Enricher` and `EventStore` traits.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, instrument, warn, Instrument, Span};

use crate::adapters::{CapabilityError, Enricher, EventStore};
use crate::domain::{EnrichedEvent, EnrichmentRequest, Event, EventId, Outcome};

use super::admission::Admission;
use super::dedup::DedupWindow;
use super::settings::{ConfigError, ProcessorConfig};
use super::stats::{ProcessorStats, StatsSnapshot};

/// Which capability a call goes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Enrich,
    Store,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Enrich => f.write_str("enrich"),
            Phase::Store => f.write_str("store"),
        }
    }
}

/// Orchestrates one event's lifecycle. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct EventProcessor {
    inner: Arc<Inner>,
}

struct Inner {
    enricher: Arc<dyn Enricher>,
    store: Arc<dyn EventStore>,
    config: ProcessorConfig,
    dedup: DedupWindow,
    admission: Admission,
    stats: ProcessorStats,
}

impl EventProcessor {
    /// Create a processor over the given capabilities
    pub fn new(
        enricher: Arc<dyn Enricher>,
        store: Arc<dyn EventStore>,
        config: ProcessorConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        info!(
            enricher = enricher.name(),
            store = store.name(),
            max_in_flight = config.max_in_flight,
            max_queued = config.max_queued,
            "Event processor ready"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                dedup: DedupWindow::new(config.dedup_ttl()),
                admission: Admission::new(config.max_in_flight, config.max_queued),
                stats: ProcessorStats::default(),
                enricher,
                store,
                config,
            }),
        })
    }

    /// Process one event to a terminal outcome.
    ///
    /// Deliveries of an id that is already being processed wait on that id's
    /// lock without holding a processing slot. Once admitted, the work runs on
    /// its own task: dropping the returned future does not abandon an
    /// enrichment/store sequence half way.
    #[instrument(skip(self, event), fields(event_id = %event.id()))]
    pub async fn process(&self, event: Event) -> Outcome {
        if let Err(reason) = event.validate() {
            warn!(%reason, "Rejecting invalid event");
            self.inner.stats.record_outcome(Outcome::RejectedInvalid);
            return Outcome::RejectedInvalid;
        }

        if let Some(outcome) = self.inner.dedup.lookup(event.id()) {
            debug!(%outcome, "Event already processed (dedup window)");
            self.inner.stats.record_dedup_hit();
            return outcome;
        }

        let key = self.inner.dedup.lock(event.id()).await;

        // A concurrent delivery of the same id may have finished while we waited
        if let Some(outcome) = self.inner.dedup.lookup(event.id()) {
            debug!(%outcome, "Concurrent delivery already processed this event");
            self.inner.stats.record_dedup_hit();
            return outcome;
        }

        let Some(permit) = self.inner.admission.admit().await else {
            warn!(
                in_flight = self.inner.admission.in_flight(),
                queued = self.inner.admission.queued(),
                "Processor overloaded, turning event away"
            );
            self.inner.stats.record_outcome(Outcome::Overloaded);
            return Outcome::Overloaded;
        };

        let inner = Arc::clone(&self.inner);
        let id = event.id().clone();
        let task = tokio::spawn(
            async move {
                // Released only after the outcome is recorded
                let _key = key;
                let _permit = permit;
                inner.run(event).await
            }
            .instrument(Span::current()),
        );

        match task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                // Durable state is unknown; the store's idempotency makes redelivery safe
                error!(event_id = %id, error = %e, "Processing task aborted");
                self.inner.stats.record_outcome(Outcome::FailedStore);
                Outcome::FailedStore
            }
        }
    }

    /// Outcome recorded for `id` within the dedup window
    pub fn recorded_outcome(&self, id: &EventId) -> Option<Outcome> {
        self.inner.dedup.lookup(id)
    }

    /// Drop expired dedup entries now rather than waiting for the next write
    pub fn sweep_expired(&self) -> usize {
        self.inner.dedup.sweep()
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Events currently holding a processing slot
    pub fn in_flight(&self) -> usize {
        self.inner.admission.in_flight()
    }

    /// Events waiting for a processing slot
    pub fn queued(&self) -> usize {
        self.inner.admission.queued()
    }

    /// Per-event locks currently held or awaited
    pub fn active_locks(&self) -> usize {
        self.inner.dedup.active_locks()
    }
}

impl Inner {
    /// Runs with the event's key held, so nothing else processes this id
    async fn run(&self, event: Event) -> Outcome {
        let started = Instant::now();
        let outcome = self.execute(&event).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        if outcome.is_recorded() {
            self.dedup.record(event.id().clone(), outcome);
        }
        self.stats.record_outcome(outcome);

        match outcome {
            Outcome::Stored => info!(duration_ms, "Event stored"),
            _ => error!(%outcome, duration_ms, "Event failed"),
        }
        outcome
    }

    async fn execute(&self, event: &Event) -> Outcome {
        let request = &EnrichmentRequest::from_event(event);
        let (enricher, store) = (&self.enricher, &self.store);

        let response = match self
            .call_with_retry(Phase::Enrich, move || enricher.enrich(request))
            .await
        {
            Ok(response) => response,
            Err(_) => return Outcome::FailedEnrichment,
        };

        let enriched = EnrichedEvent::merge(event, response);
        let enriched = &enriched;

        // Enrichment is discarded if the store gives up
        match self
            .call_with_retry(Phase::Store, move || store.store(enriched))
            .await
        {
            Ok(()) => Outcome::Stored,
            Err(_) => Outcome::FailedStore,
        }
    }

    /// Call a capability under the per-call timeout, retrying transient failures
    async fn call_with_retry<T, F, Fut>(&self, phase: Phase, mut call: F) -> Result<T, CapabilityError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CapabilityError>>,
    {
        let policy = &self.config.retry;
        let timeout = self.config.call_timeout();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match phase {
                Phase::Enrich => self.stats.record_enrich_call(),
                Phase::Store => self.stats.record_store_call(),
            }

            let result = match tokio::time::timeout(timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(CapabilityError::TimedOut { after: timeout }),
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if err.is_transient() && policy.should_retry(attempt) {
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    %phase,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Call failed, retrying"
                );
                self.stats.record_retry();
                tokio::time::sleep(delay).await;
                continue;
            }

            if err.is_transient() {
                error!(%phase, attempt, error = %err, "Retries exhausted");
            } else {
                error!(%phase, attempt, error = %err, "Permanent failure");
            }
            return Err(err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{MemoryStore, StaticEnricher};

    #[test]
    fn test_rejects_invalid_config() {
        let config = ProcessorConfig {
            max_in_flight: 0,
            ..Default::default()
        };
        let result = EventProcessor::new(
            Arc::new(StaticEnricher::default()),
            Arc::new(MemoryStore::new()),
            config,
        );
        assert!(matches!(result, Err(ConfigError::NoConcurrency)));
    }

    #[test]
    fn test_phase_names() {
        assert_eq!(Phase::Enrich.to_string(), "enrich");
        assert_eq!(Phase::Store.to_string(), "store");
    }
}

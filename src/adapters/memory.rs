//! In-memory capabilities.
//!
//! `StaticEnricher` and `MemoryStore` are usable on their own; the scripting
//! hooks (queued results, delays, gates, lost acknowledgements) let tests drive
//! the processor through every failure path.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use super::{CapabilityError, Enricher, EventStore};
use crate::domain::{EnrichedEvent, EnrichmentRequest, EnrichmentResponse, EventId, Payload};

/// Scripted call results shared by the enricher and store doubles
struct Script<T: Clone> {
    queue: Mutex<VecDeque<Result<T, CapabilityError>>>,
    fallback: Result<T, CapabilityError>,
    delay: Option<Duration>,
    gate: Option<Semaphore>,
    stalls: AtomicUsize,
    calls: AtomicUsize,
}

impl<T: Clone> Script<T> {
    fn new(fallback: Result<T, CapabilityError>) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            fallback,
            delay: None,
            gate: None,
            stalls: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    fn push(&self, result: Result<T, CapabilityError>) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(result);
    }

    async fn next(&self) -> Result<T, CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let stalled = self
            .stalls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if stalled {
            // Never answers; only the caller's timeout ends this call
            std::future::pending::<()>().await;
        }

        if let Some(gate) = &self.gate {
            match gate.acquire().await {
                Ok(permit) => permit.forget(),
                Err(_) => return Err(CapabilityError::transient("gate closed")),
            }
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        scripted.unwrap_or_else(|| self.fallback.clone())
    }

    fn release(&self, calls: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(calls);
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn wait_for_calls(&self, calls: usize) {
        while self.calls() < calls {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }
}

/// Enricher that always returns the same attributes
#[derive(Debug, Clone, Default)]
pub struct StaticEnricher {
    attributes: Payload,
}

impl StaticEnricher {
    pub fn new(attributes: Payload) -> Self {
        Self { attributes }
    }

    /// Build from `key=value` pairs; values parse as JSON when they can
    pub fn from_pairs<I, S>(pairs: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut attributes = Payload::new();
        for pair in pairs {
            let pair = pair.as_ref();
            let (key, raw) = pair
                .split_once('=')
                .ok_or_else(|| anyhow::anyhow!("Attribute '{}' is not in key=value form", pair))?;
            let value = serde_json::from_str(raw)
                .unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
            attributes.insert(key.trim().to_string(), value);
        }
        Ok(Self { attributes })
    }
}

#[async_trait]
impl Enricher for StaticEnricher {
    fn name(&self) -> &str {
        "static"
    }

    async fn enrich(
        &self,
        _request: &EnrichmentRequest,
    ) -> Result<EnrichmentResponse, CapabilityError> {
        Ok(EnrichmentResponse::new(self.attributes.clone()))
    }
}

/// Enricher replaying a script of results, then a fallback
pub struct ScriptedEnricher {
    script: Script<Payload>,
}

impl ScriptedEnricher {
    /// Every unscripted call succeeds with `attributes`
    pub fn succeeding(attributes: Payload) -> Self {
        Self {
            script: Script::new(Ok(attributes)),
        }
    }

    /// Every unscripted call fails with `error`
    pub fn failing(error: CapabilityError) -> Self {
        Self {
            script: Script::new(Err(error)),
        }
    }

    /// Queue a result ahead of the fallback
    pub fn then(self, result: Result<Payload, CapabilityError>) -> Self {
        self.script.push(result);
        self
    }

    /// Queue the same failure `times` times
    pub fn then_fail(self, error: CapabilityError, times: usize) -> Self {
        for _ in 0..times {
            self.script.push(Err(error.clone()));
        }
        self
    }

    /// Sleep before answering every call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.script.delay = Some(delay);
        self
    }

    /// Hold every call open until [`ScriptedEnricher::release`]
    pub fn gated(mut self) -> Self {
        self.script.gate = Some(Semaphore::new(0));
        self
    }

    /// Let `calls` held calls proceed
    pub fn release(&self, calls: usize) {
        self.script.release(calls);
    }

    /// Number of calls received so far, including held ones
    pub fn calls(&self) -> usize {
        self.script.calls()
    }

    pub async fn wait_for_calls(&self, calls: usize) {
        self.script.wait_for_calls(calls).await
    }
}

#[async_trait]
impl Enricher for ScriptedEnricher {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn enrich(
        &self,
        _request: &EnrichmentRequest,
    ) -> Result<EnrichmentResponse, CapabilityError> {
        self.script.next().await.map(EnrichmentResponse::new)
    }
}

/// Map-backed store, idempotent on event id
pub struct MemoryStore {
    records: Mutex<HashMap<EventId, EnrichedEvent>>,
    script: Script<()>,
    lost_acks: bool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            script: Script::new(Ok(())),
            lost_acks: false,
        }
    }

    /// Every unscripted call fails with `error` and persists nothing
    pub fn failing(error: CapabilityError) -> Self {
        Self {
            script: Script::new(Err(error)),
            ..Self::new()
        }
    }

    /// Queue a result ahead of the fallback
    pub fn then(self, result: Result<(), CapabilityError>) -> Self {
        self.script.push(result);
        self
    }

    /// Sleep before answering every call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.script.delay = Some(delay);
        self
    }

    /// Hang the next `times` calls without answering
    pub fn then_stall(self, times: usize) -> Self {
        self.script.stalls.fetch_add(times, Ordering::SeqCst);
        self
    }

    /// Apply writes even when the scripted answer is a failure, as if the
    /// record landed but the acknowledgement was lost on the way back
    pub fn with_lost_acks(mut self) -> Self {
        self.lost_acks = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.script.calls()
    }

    pub fn get(&self, id: &EventId) -> Option<EnrichedEvent> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All records, ordered by event id
    pub fn records(&self) -> Vec<EnrichedEvent> {
        let mut records: Vec<EnrichedEvent> = self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        records.sort_by(|a, b| a.event_id().cmp(b.event_id()));
        records
    }

    fn apply(&self, event: &EnrichedEvent) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(event.event_id().clone())
            .or_insert_with(|| event.clone());
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn store(&self, event: &EnrichedEvent) -> Result<(), CapabilityError> {
        let result = self.script.next().await;
        if result.is_ok() || self.lost_acks {
            self.apply(event);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Event;
    use serde_json::json;

    fn payload(value: serde_json::Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    fn enriched(id: &str) -> EnrichedEvent {
        let event = Event::new(id, payload(json!({"amount": 10})));
        EnrichedEvent::merge(&event, EnrichmentResponse::default())
    }

    #[test]
    fn test_static_enricher_from_pairs() {
        let enricher = StaticEnricher::from_pairs(["tax_rate=0.1", "region=eu"]).unwrap();
        assert_eq!(enricher.attributes["tax_rate"], json!(0.1));
        assert_eq!(enricher.attributes["region"], json!("eu"));

        assert!(StaticEnricher::from_pairs(["missing-separator"]).is_err());
    }

    #[tokio::test]
    async fn test_scripted_enricher_runs_script_then_fallback() {
        let enricher = ScriptedEnricher::succeeding(payload(json!({"ok": true})))
            .then_fail(CapabilityError::transient("reset"), 2);
        let request = EnrichmentRequest::from_event(&Event::new("e", payload(json!({"a": 1}))));

        assert!(enricher.enrich(&request).await.is_err());
        assert!(enricher.enrich(&request).await.is_err());
        assert!(enricher.enrich(&request).await.is_ok());
        assert_eq!(enricher.calls(), 3);
    }

    #[tokio::test]
    async fn test_memory_store_is_idempotent() {
        let store = MemoryStore::new();
        let record = enriched("evt-1");

        store.store(&record).await.unwrap();
        store.store(&record).await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.calls(), 2);
        assert_eq!(store.get(record.event_id()), Some(record));
    }

    #[tokio::test]
    async fn test_failed_store_persists_nothing() {
        let store = MemoryStore::failing(CapabilityError::permanent("read-only"));
        assert!(store.store(&enriched("evt-1")).await.is_err());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_lost_ack_still_applies() {
        let store = MemoryStore::new()
            .then(Err(CapabilityError::transient("ack lost")))
            .with_lost_acks();
        let record = enriched("evt-1");

        assert!(store.store(&record).await.is_err());
        assert_eq!(store.len(), 1);
        store.store(&record).await.unwrap();
        assert_eq!(store.len(), 1);
    }
}

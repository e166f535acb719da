//! Enrichment request/response and the merged record handed to storage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::events::{Event, EventId, Payload};

/// What a provider receives. Derived deterministically from an [`Event`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentRequest {
    pub event_id: EventId,

    /// Copy of the event payload
    pub payload: Payload,

    /// First 16 hex chars of SHA-256 over the canonical payload JSON
    pub fingerprint: String,

    /// Idempotency key format: "{event_id}:enrich:{fingerprint}"
    pub idempotency_key: String,
}

impl EnrichmentRequest {
    pub fn from_event(event: &Event) -> Self {
        let fingerprint = payload_fingerprint(event.payload());
        let idempotency_key = generate_idempotency_key(event.id(), "enrich", &fingerprint);

        Self {
            event_id: event.id().clone(),
            payload: event.payload().clone(),
            fingerprint,
            idempotency_key,
        }
    }
}

/// Supplementary attributes returned by a provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentResponse {
    #[serde(default)]
    pub attributes: Payload,
}

impl EnrichmentResponse {
    pub fn new(attributes: Payload) -> Self {
        Self { attributes }
    }
}

/// An event's payload merged with its enrichment.
///
/// Built once per successfully enriched event and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedEvent {
    event_id: EventId,
    attributes: Payload,
    created_at: DateTime<Utc>,
    enriched_at: DateTime<Utc>,
}

impl EnrichedEvent {
    /// Merge enrichment into the event payload. Payload values win on collision.
    pub fn merge(event: &Event, response: EnrichmentResponse) -> Self {
        let mut attributes = event.payload().clone();
        for (key, value) in response.attributes {
            attributes.entry(key).or_insert(value);
        }

        Self {
            event_id: event.id().clone(),
            attributes,
            created_at: event.created_at(),
            enriched_at: Utc::now(),
        }
    }

    pub fn event_id(&self) -> &EventId {
        &self.event_id
    }

    pub fn attributes(&self) -> &Payload {
        &self.attributes
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn enriched_at(&self) -> DateTime<Utc> {
        self.enriched_at
    }
}

/// Generate an idempotency key for one phase of an event
pub fn generate_idempotency_key(event_id: &EventId, phase: &str, fingerprint: &str) -> String {
    format!("{}:{}:{}", event_id, phase, fingerprint)
}

/// Hash a payload (first 16 chars of SHA256 over its JSON form)
///
/// `serde_json::Map` keeps keys sorted, so equal payloads hash equally.
pub fn payload_fingerprint(payload: &Payload) -> String {
    let canonical = serde_json::to_vec(payload).unwrap_or_default();
    let digest = Sha256::digest(&canonical);
    hex::encode(&digest[..8])
}

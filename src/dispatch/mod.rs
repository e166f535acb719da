//! Dispatch fronts: adapt transport messages into events and outcomes back
//! into transport responses.
//!
//! A front owns at-least-once delivery on its side of the boundary. The
//! processor's dedup window and the store's idempotency make redelivery safe.

pub mod lines;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Event, EventId, Outcome, Payload};

pub use lines::LineDispatcher;

/// Wire shape of one inbound message
#[derive(Debug, Clone, Deserialize)]
pub struct InboundMessage {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub payload: Payload,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl InboundMessage {
    /// Convert into exactly one event. Without an id (and without assignment)
    /// the event carries an empty id and the processor rejects it.
    pub fn into_event(self, assign_missing_id: bool) -> Event {
        let id = match self.id {
            Some(id) => EventId::new(id),
            None if assign_missing_id => EventId::generate(),
            None => EventId::new(""),
        };

        let event = Event::new(id, self.payload);
        match self.created_at {
            Some(created_at) => event.with_created_at(created_at),
            None => event,
        }
    }
}

/// What a front sends back for one message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// 1-indexed position of the message in its stream
    pub line: usize,
    pub id: Option<String>,
    pub outcome: Outcome,
    pub status: u16,
    pub retryable: bool,
}

impl Response {
    pub fn new(line: usize, id: Option<String>, outcome: Outcome) -> Self {
        Self {
            line,
            id,
            outcome,
            status: outcome.status_code(),
            retryable: outcome.is_retryable(),
        }
    }
}

/// Outcome counts for one dispatch run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    counts: BTreeMap<String, usize>,
    total: usize,
}

impl Summary {
    pub fn add(&mut self, outcome: Outcome) {
        *self.counts.entry(outcome.to_string()).or_insert(0) += 1;
        self.total += 1;
    }

    pub fn count(&self, outcome: Outcome) -> usize {
        self.counts.get(outcome.as_str()).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_with_id() {
        let message: InboundMessage =
            serde_json::from_str(r#"{"id": "evt-1", "payload": {"amount": 10}}"#).unwrap();
        let event = message.into_event(false);

        assert_eq!(event.id().as_str(), "evt-1");
        assert_eq!(event.payload()["amount"], serde_json::json!(10));
        assert!(event.validate().is_ok());
    }

    #[test]
    fn test_missing_id_assignment() {
        let message: InboundMessage = serde_json::from_str(r#"{"payload": {"a": 1}}"#).unwrap();
        assert!(message.clone().into_event(true).validate().is_ok());
        assert!(message.into_event(false).validate().is_err());
    }

    #[test]
    fn test_created_at_is_kept() {
        let message: InboundMessage = serde_json::from_str(
            r#"{"id": "e", "payload": {"a": 1}, "created_at": "2024-05-01T12:00:00Z"}"#,
        )
        .unwrap();
        let event = message.into_event(false);
        assert_eq!(event.created_at().to_rfc3339(), "2024-05-01T12:00:00+00:00");
    }

    #[test]
    fn test_response_mapping() {
        let response = Response::new(3, Some("evt-1".into()), Outcome::Overloaded);
        assert_eq!(response.status, 503);
        assert!(response.retryable);

        let stored = Response::new(1, None, Outcome::Stored);
        assert_eq!(stored.status, 201);
        assert!(!stored.retryable);
    }

    #[test]
    fn test_summary_counts() {
        let mut summary = Summary::default();
        summary.add(Outcome::Stored);
        summary.add(Outcome::Stored);
        summary.add(Outcome::RejectedInvalid);

        assert_eq!(summary.total(), 3);
        assert_eq!(summary.count(Outcome::Stored), 2);
        assert_eq!(summary.count(Outcome::RejectedInvalid), 1);
        assert_eq!(summary.count(Outcome::FailedStore), 0);
    }
}

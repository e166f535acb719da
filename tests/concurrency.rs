//! Concurrency Integration Tests
//!
//! Tests for concurrent deliveries, admission control and caller cancellation.

use std::sync::Arc;
use std::time::Duration;

use enrichr::adapters::{MemoryStore, ScriptedEnricher};
use enrichr::core::{EventProcessor, ProcessorConfig, RetryPolicy};
use enrichr::domain::{Event, EventId, Outcome, Payload};
use serde_json::json;

fn payload(value: serde_json::Value) -> Payload {
    value.as_object().cloned().unwrap()
}

fn config(max_in_flight: usize, max_queued: usize) -> ProcessorConfig {
    ProcessorConfig {
        retry: RetryPolicy {
            max_retries: 1,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            backoff_multiplier: 2.0,
        },
        call_timeout_ms: 5_000,
        dedup_ttl_ms: 60_000,
        max_in_flight,
        max_queued,
    }
}

fn order(id: &str) -> Event {
    Event::new(id, payload(json!({"amount": 10})))
}

/// Poll until `check` holds, failing the test after a second
async fn eventually(check: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(1), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_deliveries_execute_once() {
    let enricher = Arc::new(
        ScriptedEnricher::succeeding(payload(json!({"tax_rate": 0.1})))
            .with_delay(Duration::from_millis(20)),
    );
    let store = Arc::new(MemoryStore::new());
    let processor =
        EventProcessor::new(enricher.clone(), store.clone(), config(16, 64)).unwrap();

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let processor = processor.clone();
            tokio::spawn(async move { processor.process(order("evt-1")).await })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.await.unwrap(), Outcome::Stored);
    }

    assert_eq!(enricher.calls(), 1);
    assert_eq!(store.calls(), 1);
    assert_eq!(store.len(), 1);
    assert_eq!(processor.active_locks(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_distinct_events_run_in_parallel() {
    let enricher = Arc::new(
        ScriptedEnricher::succeeding(payload(json!({"tax_rate": 0.1})))
            .with_delay(Duration::from_millis(50)),
    );
    let store = Arc::new(MemoryStore::new());
    let processor =
        EventProcessor::new(enricher.clone(), store.clone(), config(8, 0)).unwrap();

    let started = std::time::Instant::now();
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let processor = processor.clone();
            tokio::spawn(async move { processor.process(order(&format!("evt-{}", i))).await })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.await.unwrap(), Outcome::Stored);
    }

    // Serial processing would take at least 400ms
    assert!(started.elapsed() < Duration::from_millis(300));
    assert_eq!(store.len(), 8);
}

#[tokio::test]
async fn test_overload_turns_events_away() {
    let enricher = Arc::new(
        ScriptedEnricher::succeeding(payload(json!({"tax_rate": 0.1}))).gated(),
    );
    let store = Arc::new(MemoryStore::new());
    let processor =
        EventProcessor::new(enricher.clone(), store.clone(), config(1, 0)).unwrap();

    let busy = {
        let processor = processor.clone();
        tokio::spawn(async move { processor.process(order("evt-a")).await })
    };
    enricher.wait_for_calls(1).await;
    assert_eq!(processor.in_flight(), 1);

    assert_eq!(processor.process(order("evt-b")).await, Outcome::Overloaded);
    assert_eq!(enricher.calls(), 1);

    enricher.release(1);
    assert_eq!(busy.await.unwrap(), Outcome::Stored);

    // Overloaded is not remembered, so a redelivery goes through
    assert_eq!(processor.recorded_outcome(&EventId::new("evt-b")), None);
    enricher.release(1);
    assert_eq!(processor.process(order("evt-b")).await, Outcome::Stored);
    assert_eq!(processor.stats().overloaded, 1);
}

#[tokio::test]
async fn test_queued_events_wait_for_a_slot() {
    let enricher = Arc::new(
        ScriptedEnricher::succeeding(payload(json!({"tax_rate": 0.1}))).gated(),
    );
    let store = Arc::new(MemoryStore::new());
    let processor =
        EventProcessor::new(enricher.clone(), store.clone(), config(1, 1)).unwrap();

    let first = {
        let processor = processor.clone();
        tokio::spawn(async move { processor.process(order("evt-a")).await })
    };
    enricher.wait_for_calls(1).await;

    let second = {
        let processor = processor.clone();
        tokio::spawn(async move { processor.process(order("evt-b")).await })
    };
    eventually(|| processor.queued() == 1).await;

    // Slot taken and queue full
    assert_eq!(processor.process(order("evt-c")).await, Outcome::Overloaded);

    enricher.release(2);
    assert_eq!(first.await.unwrap(), Outcome::Stored);
    assert_eq!(second.await.unwrap(), Outcome::Stored);
    assert_eq!(store.len(), 2);
    assert_eq!(processor.queued(), 0);
}

#[tokio::test]
async fn test_dedup_hits_bypass_admission() {
    let enricher = Arc::new(
        ScriptedEnricher::succeeding(payload(json!({"tax_rate": 0.1}))).gated(),
    );
    let store = Arc::new(MemoryStore::new());
    let processor =
        EventProcessor::new(enricher.clone(), store.clone(), config(1, 0)).unwrap();

    enricher.release(1);
    assert_eq!(processor.process(order("evt-a")).await, Outcome::Stored);

    let busy = {
        let processor = processor.clone();
        tokio::spawn(async move { processor.process(order("evt-b")).await })
    };
    enricher.wait_for_calls(2).await;

    // The only slot is taken, yet a known event is still answered
    assert_eq!(processor.process(order("evt-a")).await, Outcome::Stored);

    enricher.release(1);
    assert_eq!(busy.await.unwrap(), Outcome::Stored);
}

#[tokio::test]
async fn test_cancelled_caller_does_not_abandon_work() {
    let enricher = Arc::new(
        ScriptedEnricher::succeeding(payload(json!({"tax_rate": 0.1}))).gated(),
    );
    let store = Arc::new(MemoryStore::new());
    let processor =
        EventProcessor::new(enricher.clone(), store.clone(), config(4, 4)).unwrap();

    let abandoned =
        tokio::time::timeout(Duration::from_millis(30), processor.process(order("evt-1"))).await;
    assert!(abandoned.is_err());
    assert_eq!(enricher.calls(), 1);

    enricher.release(1);
    eventually(|| store.len() == 1).await;
    eventually(|| processor.recorded_outcome(&EventId::new("evt-1")).is_some()).await;

    // The finished outcome answers the redelivery
    assert_eq!(processor.process(order("evt-1")).await, Outcome::Stored);
    assert_eq!(enricher.calls(), 1);
    assert_eq!(store.calls(), 1);
    eventually(|| processor.in_flight() == 0).await;
}

#[tokio::test]
async fn test_redelivery_waits_without_taking_a_slot() {
    let enricher = Arc::new(
        ScriptedEnricher::succeeding(payload(json!({"tax_rate": 0.1}))).gated(),
    );
    let store = Arc::new(MemoryStore::new());
    let processor =
        EventProcessor::new(enricher.clone(), store.clone(), config(2, 0)).unwrap();

    let first = {
        let processor = processor.clone();
        tokio::spawn(async move { processor.process(order("evt-a")).await })
    };
    enricher.wait_for_calls(1).await;

    let redelivery = {
        let processor = processor.clone();
        tokio::spawn(async move { processor.process(order("evt-a")).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(processor.in_flight(), 1);

    // The second slot is still free for a different event
    let other = {
        let processor = processor.clone();
        tokio::spawn(async move { processor.process(order("evt-b")).await })
    };
    enricher.wait_for_calls(2).await;
    assert_eq!(processor.in_flight(), 2);

    enricher.release(2);
    assert_eq!(first.await.unwrap(), Outcome::Stored);
    assert_eq!(redelivery.await.unwrap(), Outcome::Stored);
    assert_eq!(other.await.unwrap(), Outcome::Stored);

    assert_eq!(enricher.calls(), 2);
    assert_eq!(store.len(), 2);
    assert_eq!(processor.stats().overloaded, 0);
    assert_eq!(processor.active_locks(), 0);
}

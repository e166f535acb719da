//! Dedup window: recent outcomes and per-event locks.
//!
//! Two maps, both keyed by event id:
//! - outcomes recorded within the TTL, answering repeat deliveries
//! - a lock arena serializing concurrent processing of one id
//!
//! Lock handles are reference counted. A handle stays in the arena only while
//! some task holds or waits on it, so the arena never outgrows the number of
//! events in flight.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

use crate::domain::{EventId, Outcome};

#[derive(Debug, Clone, Copy)]
struct Recorded {
    outcome: Outcome,
    at: Instant,
}

type LockArena = DashMap<EventId, Arc<AsyncMutex<()>>>;

/// Concurrent map of recent outcomes plus the per-id lock arena
pub struct DedupWindow {
    ttl: Duration,
    outcomes: DashMap<EventId, Recorded>,
    locks: Arc<LockArena>,
    last_sweep: Mutex<Instant>,
}

impl DedupWindow {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            outcomes: DashMap::new(),
            locks: Arc::new(DashMap::new()),
            last_sweep: Mutex::new(Instant::now()),
        }
    }

    /// Outcome recorded for `id`, if it has not expired
    pub fn lookup(&self, id: &EventId) -> Option<Outcome> {
        let expired = match self.outcomes.get(id) {
            Some(recorded) if recorded.at.elapsed() < self.ttl => return Some(recorded.outcome),
            Some(_) => true,
            None => false,
        };

        if expired {
            self.outcomes
                .remove_if(id, |_, recorded| recorded.at.elapsed() >= self.ttl);
        }
        None
    }

    /// Remember a terminal outcome. Expired entries are swept at most once per TTL.
    pub fn record(&self, id: EventId, outcome: Outcome) {
        self.outcomes.insert(
            id,
            Recorded {
                outcome,
                at: Instant::now(),
            },
        );

        let due = {
            let mut last = self.last_sweep.lock().unwrap_or_else(PoisonError::into_inner);
            if last.elapsed() >= self.ttl {
                *last = Instant::now();
                true
            } else {
                false
            }
        };
        if due {
            self.sweep();
        }
    }

    /// Drop every expired outcome, returning how many were removed
    pub fn sweep(&self) -> usize {
        let before = self.outcomes.len();
        self.outcomes
            .retain(|_, recorded| recorded.at.elapsed() < self.ttl);
        let removed = before.saturating_sub(self.outcomes.len());
        if removed > 0 {
            debug!(removed, remaining = self.outcomes.len(), "Swept dedup window");
        }
        removed
    }

    /// Outcomes currently held, expired or not
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Lock handles currently in the arena
    pub fn active_locks(&self) -> usize {
        self.locks.len()
    }

    /// Wait for exclusive access to `id`. Other ids are never blocked.
    ///
    /// The guard owns its share of the arena, so it can move into another task.
    pub async fn lock(&self, id: &EventId) -> KeyGuard {
        let handle = {
            let entry = self
                .locks
                .entry(id.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())));
            Arc::clone(entry.value())
        };

        // Registered before awaiting so a cancelled waiter still releases its reference
        let lease = LockLease {
            locks: Arc::clone(&self.locks),
            id: id.clone(),
            handle: Some(Arc::clone(&handle)),
        };
        let guard = handle.lock_owned().await;

        KeyGuard {
            _guard: guard,
            _lease: lease,
        }
    }
}

/// Exclusive access to one event id. Released on drop.
pub struct KeyGuard {
    // Field order matters: the mutex guard drops before the lease checks the count
    _guard: OwnedMutexGuard<()>,
    _lease: LockLease,
}

/// One counted reference to an arena entry
struct LockLease {
    locks: Arc<LockArena>,
    id: EventId,
    handle: Option<Arc<AsyncMutex<()>>>,
}

impl Drop for LockLease {
    fn drop(&mut self) {
        drop(self.handle.take());
        // Only the arena's own reference left: nobody holds or waits on this id
        self.locks
            .remove_if(&self.id, |_, handle| Arc::strong_count(handle) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_record_and_lookup() {
        let window = DedupWindow::new(Duration::from_secs(60));
        let id = EventId::new("evt-1");

        assert_eq!(window.lookup(&id), None);
        window.record(id.clone(), Outcome::Stored);
        assert_eq!(window.lookup(&id), Some(Outcome::Stored));
        assert_eq!(window.lookup(&EventId::new("evt-2")), None);
    }

    #[test]
    fn test_expired_outcome_is_forgotten() {
        let window = DedupWindow::new(Duration::from_millis(20));
        let id = EventId::new("evt-1");

        window.record(id.clone(), Outcome::FailedStore);
        std::thread::sleep(Duration::from_millis(40));

        assert_eq!(window.lookup(&id), None);
        assert!(window.is_empty());
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let window = DedupWindow::new(Duration::from_millis(30));
        window.record(EventId::new("old"), Outcome::Stored);
        std::thread::sleep(Duration::from_millis(50));
        window.outcomes.insert(
            EventId::new("fresh"),
            Recorded {
                outcome: Outcome::Stored,
                at: Instant::now(),
            },
        );

        assert_eq!(window.sweep(), 1);
        assert_eq!(window.len(), 1);
        assert_eq!(window.lookup(&EventId::new("fresh")), Some(Outcome::Stored));
    }

    #[tokio::test]
    async fn test_lock_arena_empties_after_release() {
        let window = DedupWindow::new(Duration::from_secs(60));
        let id = EventId::new("evt-1");

        {
            let _guard = window.lock(&id).await;
            assert_eq!(window.active_locks(), 1);
        }
        assert_eq!(window.active_locks(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_same_id_is_serialized() {
        let window = Arc::new(DedupWindow::new(Duration::from_secs(60)));
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let window = Arc::clone(&window);
            let inside = Arc::clone(&inside);
            let max_inside = Arc::clone(&max_inside);
            tasks.push(tokio::spawn(async move {
                let _guard = window.lock(&EventId::new("same")).await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert_eq!(window.active_locks(), 0);
    }

    #[tokio::test]
    async fn test_distinct_ids_do_not_block() {
        let window = DedupWindow::new(Duration::from_secs(60));

        let _a = window.lock(&EventId::new("a")).await;
        let b = tokio::time::timeout(Duration::from_millis(100), window.lock(&EventId::new("b"))).await;

        assert!(b.is_ok());
        assert_eq!(window.active_locks(), 2);
    }

    #[tokio::test]
    async fn test_guard_moves_into_task() {
        let window = DedupWindow::new(Duration::from_secs(60));
        let id = EventId::new("evt-1");

        let guard = window.lock(&id).await;
        let holder = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            drop(guard);
        });

        // Blocked until the task lets go
        let waited = tokio::time::timeout(Duration::from_millis(5), window.lock(&id)).await;
        assert!(waited.is_err());

        holder.await.unwrap();
        let _again = window.lock(&id).await;
        assert_eq!(window.active_locks(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_releases_reference() {
        let window = DedupWindow::new(Duration::from_secs(60));
        let id = EventId::new("evt-1");

        let held = window.lock(&id).await;
        let waited = tokio::time::timeout(Duration::from_millis(20), window.lock(&id)).await;
        assert!(waited.is_err());

        drop(held);
        assert_eq!(window.active_locks(), 0);
    }
}

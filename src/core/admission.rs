//! Concurrency limit with a bounded wait queue.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Bounds in-flight work. Callers past the limit wait in line; callers past
/// the line are turned away.
pub struct Admission {
    permits: Arc<Semaphore>,
    max_in_flight: usize,
    max_queued: usize,
    waiting: AtomicUsize,
}

impl Admission {
    pub fn new(max_in_flight: usize, max_queued: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_in_flight)),
            max_in_flight,
            max_queued,
            waiting: AtomicUsize::new(0),
        }
    }

    /// Take a slot, waiting if the queue has room. `None` means overloaded.
    pub async fn admit(&self) -> Option<OwnedSemaphorePermit> {
        if let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() {
            return Some(permit);
        }

        let joined = self
            .waiting
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.max_queued).then_some(n + 1)
            })
            .is_ok();
        if !joined {
            return None;
        }

        let _place = QueuePlace(&self.waiting);
        Arc::clone(&self.permits).acquire_owned().await.ok()
    }

    /// Slots currently taken
    pub fn in_flight(&self) -> usize {
        self.max_in_flight
            .saturating_sub(self.permits.available_permits())
    }

    /// Callers currently waiting for a slot
    pub fn queued(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }
}

/// A waiter's place in line, given up on drop (including cancellation)
struct QueuePlace<'a>(&'a AtomicUsize);

impl Drop for QueuePlace<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_admits_up_to_limit() {
        let admission = Admission::new(2, 0);

        let first = admission.admit().await;
        let second = admission.admit().await;
        assert!(first.is_some());
        assert!(second.is_some());
        assert_eq!(admission.in_flight(), 2);

        assert!(admission.admit().await.is_none());

        drop(first);
        assert!(admission.admit().await.is_some());
    }

    #[tokio::test]
    async fn test_waiters_are_bounded() {
        let admission = Arc::new(Admission::new(1, 1));
        let held = admission.admit().await.unwrap();

        let waiter = {
            let admission = Arc::clone(&admission);
            tokio::spawn(async move { admission.admit().await.is_some() })
        };
        while admission.queued() < 1 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        // Line is full
        assert!(admission.admit().await.is_none());

        drop(held);
        assert!(waiter.await.unwrap());
        assert_eq!(admission.queued(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_leaves_queue() {
        let admission = Admission::new(1, 1);
        let _held = admission.admit().await.unwrap();

        let gave_up = tokio::time::timeout(Duration::from_millis(10), admission.admit()).await;
        assert!(gave_up.is_err());
        assert_eq!(admission.queued(), 0);
    }
}

//! Bounds how many pty spawn calls are in flight at once.
//!
//! Spawning is the expensive, failure-prone pty operation (process creation
//! plus shell init); bulk workspace activation would otherwise fire dozens of
//! spawns concurrently. Only spawn goes through the limiter; write, resize
//! and close do not.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub(crate) const DEFAULT_SPAWN_LIMIT: usize = 4;

/// Fixed-size slot pool with FIFO wakeups (tokio semaphores are fair: the
/// longest-waiting acquirer gets the released permit).
pub(crate) struct SpawnLimiter {
    slots: Arc<Semaphore>,
}

impl SpawnLimiter {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(limit.max(1))),
        }
    }

    /// Blocks until a slot frees up. The slot is released when the returned
    /// permit drops.
    pub(crate) async fn acquire(&self) -> OwnedSemaphorePermit {
        // The semaphore is never closed, so acquire can only fail if the
        // limiter itself is gone.
        self.slots
            .clone()
            .acquire_owned()
            .await
            .unwrap_or_else(|_| unreachable!("spawn limiter semaphore closed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[tokio::test]
    async fn never_exceeds_the_configured_limit() {
        let limiter = Arc::new(SpawnLimiter::new(4));
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let limiter = limiter.clone();
            let current = current.clone();
            let peak = peak.clone();
            tasks.push(tokio::spawn(async move {
                let _permit = limiter.acquire().await;
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                current.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 4);
        assert!(peak.load(Ordering::SeqCst) >= 2, "work should overlap");
    }

    #[tokio::test]
    async fn waiters_wake_in_fifo_order() {
        let limiter = Arc::new(SpawnLimiter::new(1));
        let order = Arc::new(Mutex::new(Vec::new()));

        // Hold the only slot so every task below queues up.
        let held = limiter.acquire().await;

        let mut tasks = Vec::new();
        for i in 0..5 {
            let limiter = limiter.clone();
            let order = order.clone();
            tasks.push(tokio::spawn(async move {
                let _permit = limiter.acquire().await;
                order.lock().unwrap().push(i);
            }));
            // Make sure each acquirer is queued before the next one starts.
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        drop(held);
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }
}

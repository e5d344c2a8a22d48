//! Counting permit pool bounding how many task actions run at once.
//!
//! Backed by `tokio::sync::Semaphore`, which queues waiters FIFO. A permit is
//! an RAII guard: dropping it returns the slot and wakes the longest waiter.

use std::sync::Arc;

use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// Held while a task action runs.
#[derive(Debug)]
pub struct LimiterPermit {
    _permit: OwnedSemaphorePermit,
}

impl ConcurrencyLimiter {
    /// Create a limiter with `permits` slots (at least one).
    pub fn new(permits: usize) -> Self {
        let capacity = permits.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a free slot, in FIFO order.
    pub async fn acquire(&self) -> Result<LimiterPermit, AcquireError> {
        let permit = Arc::clone(&self.semaphore).acquire_owned().await?;
        Ok(LimiterPermit { _permit: permit })
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Concurrency to use for a batch of `batch_size` tasks.
///
/// `min(configured, batch_size)`, further capped by the available hardware
/// parallelism when `adaptive` is set. Never below 1.
pub fn effective_concurrency(configured: usize, batch_size: usize, adaptive: bool) -> usize {
    let hint = if adaptive {
        std::thread::available_parallelism().ok().map(|n| n.get())
    } else {
        None
    };
    effective_concurrency_with_hint(configured, batch_size, hint)
}

/// [`effective_concurrency`] with an explicit parallelism hint.
pub fn effective_concurrency_with_hint(configured: usize, batch_size: usize, hint: Option<usize>) -> usize {
    let bounded = configured.min(batch_size);
    hint.map_or(bounded, |h| bounded.min(h)).max(1)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use tokio::task::JoinSet;

    use super::*;

    #[test]
    fn zero_permits_is_clamped_to_one() {
        let limiter = ConcurrencyLimiter::new(0);
        assert_eq!(limiter.capacity(), 1);
        assert_eq!(limiter.available(), 1);
    }

    #[tokio::test]
    async fn dropping_permit_releases_slot() {
        let limiter = ConcurrencyLimiter::new(1);
        let permit = limiter.acquire().await.unwrap();
        assert_eq!(limiter.available(), 0);

        drop(permit);
        assert_eq!(limiter.available(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn never_exceeds_capacity() {
        let limiter = ConcurrencyLimiter::new(3);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut set = JoinSet::new();

        for _ in 0..10 {
            let permit = limiter.acquire().await.unwrap();
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            set.spawn(async move {
                let _permit = permit;
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            });
        }
        while set.join_next().await.is_some() {}

        assert_eq!(peak.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn effective_concurrency_takes_minimum() {
        assert_eq!(effective_concurrency_with_hint(4, 10, None), 4);
        assert_eq!(effective_concurrency_with_hint(4, 2, None), 2);
        assert_eq!(effective_concurrency_with_hint(8, 10, Some(3)), 3);
        assert_eq!(effective_concurrency_with_hint(0, 0, Some(0)), 1);
    }

    #[test]
    fn non_adaptive_ignores_hardware() {
        assert_eq!(effective_concurrency(64, 100, false), 64);
        assert!(effective_concurrency(64, 100, true) >= 1);
    }
}

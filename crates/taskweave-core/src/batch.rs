//! Chunked and bounded-concurrency helpers for processing lists of work.
//!
//! Used wherever many independent async operations (cache lookups, file
//! deletions, file scans) should overlap without flooding the runtime.

use std::future::Future;

use futures_util::stream::{self, StreamExt};

/// Default number of items processed together by [`process_in_chunks`].
pub const DEFAULT_CHUNK_SIZE: usize = 32;

/// Run `f` over every item with at most `limit` futures in flight.
///
/// Results come back in input order.
pub async fn map_bounded<T, R, F, Fut>(items: Vec<T>, limit: usize, f: F) -> Vec<R>
where
    F: FnMut(T) -> Fut,
    Fut: Future<Output = R>,
{
    stream::iter(items)
        .map(f)
        .buffered(limit.max(1))
        .collect()
        .await
}

/// Process `items` chunk by chunk: every item in a chunk runs concurrently,
/// and the next chunk starts only after the previous one has finished.
///
/// Results come back in input order.
pub async fn process_in_chunks<T, R, F, Fut>(items: Vec<T>, chunk_size: usize, mut f: F) -> Vec<R>
where
    F: FnMut(T) -> Fut,
    Fut: Future<Output = R>,
{
    let chunk_size = chunk_size.max(1);
    let mut results = Vec::with_capacity(items.len());
    let mut iter = items.into_iter().peekable();

    while iter.peek().is_some() {
        let chunk: Vec<Fut> = iter.by_ref().take(chunk_size).map(&mut f).collect();
        results.extend(futures_util::future::join_all(chunk).await);
    }

    results
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn map_bounded_preserves_order() {
        let out = map_bounded(vec![3u64, 1, 2], 3, |n| async move {
            tokio::time::sleep(Duration::from_millis(n * 5)).await;
            n * 10
        })
        .await;
        assert_eq!(out, vec![30, 10, 20]);
    }

    #[tokio::test]
    async fn map_bounded_respects_limit() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        map_bounded((0..10).collect::<Vec<_>>(), 3, |_| {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }
        })
        .await;

        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn process_in_chunks_runs_chunks_sequentially() {
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let out = process_in_chunks((0..5).collect::<Vec<_>>(), 2, |i| {
            let log = Arc::clone(&log);
            async move {
                log.lock().unwrap().push(i);
                i + 1
            }
        })
        .await;

        assert_eq!(out, vec![1, 2, 3, 4, 5]);
        assert_eq!(log.lock().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn process_in_chunks_empty_input() {
        let out: Vec<u8> = process_in_chunks(Vec::<u8>::new(), 4, |i| async move { i }).await;
        assert!(out.is_empty());
    }
}

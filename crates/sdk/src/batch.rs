//! Bounded concurrent fan-out of chain reads.

use futures::future::try_join_all;
use itertools::Itertools;
use tracing::debug;

/// Upper bound of concurrently pending chain reads.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Runs `f` over `items` in consecutive batches of at most `batch_size`
/// concurrent futures, preserving input order in the output.
///
/// Each batch completes entirely before the next one starts; the first
/// failure aborts the remaining work and is returned.
pub async fn try_join_bounded<I, F, Fut, T, E>(items: I, batch_size: usize, mut f: F) -> Result<Vec<T>, E>
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut results = Vec::new();
    let chunks = items.into_iter().chunks(batch_size.max(1));
    for (index, chunk) in (&chunks).into_iter().enumerate() {
        let batch = try_join_all(chunk.map(&mut f)).await?;
        debug!(batch = index, size = batch.len(), "batch completed");
        results.extend(batch);
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use std::{
        cell::Cell,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    #[tokio::test]
    async fn preserves_order_and_bounds_concurrency() {
        let in_flight = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let out = try_join_bounded(0..25u32, 4, |i| {
            let in_flight = &in_flight;
            let peak = &peak;
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::task::yield_now().await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, ()>(i * 2)
            }
        })
        .await
        .unwrap();
        assert_eq!(out, (0..25).map(|i| i * 2).collect::<Vec<_>>());
        assert!(peak.load(Ordering::SeqCst) <= 4);
    }

    #[tokio::test]
    async fn failure_stops_later_batches() {
        let started = Cell::new(0);
        let res = try_join_bounded(0..10u32, 3, |i| {
            started.set(started.get() + 1);
            async move { if i == 4 { Err("boom") } else { Ok(i) } }
        })
        .await;
        assert_eq!(res, Err("boom"));
        assert_eq!(started.get(), 6);
    }
}

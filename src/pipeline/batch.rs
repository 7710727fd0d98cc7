//! Chunk-synchronous batch runner for bulk parsing operations.
//!
//! Items are processed in fixed-size chunks; all futures in a chunk run
//! concurrently and the chunk is joined before the next one starts, so
//! at most `batch_size` items are in flight at a time. Every input item
//! is accounted for in the outcome, as a result or an error, and both
//! carry the item's original index.

use std::time::Instant;

use futures::future::join_all;
use tracing::debug;

/// A successful item, tagged with its position in the input.
#[derive(Debug)]
pub struct BatchItem<T> {
    pub index: usize,
    pub value: T,
}

/// A failed item, tagged with its position in the input.
#[derive(Debug, Clone)]
pub struct BatchError {
    pub index: usize,
    pub message: String,
}

/// Aggregate outcome of a batch run.
///
/// `results.len() + errors.len()` equals the number of items actually
/// attempted, which is the full input unless a deadline cut the run short.
#[derive(Debug, Default)]
pub struct BatchOutcome<T> {
    pub results: Vec<BatchItem<T>>,
    pub errors: Vec<BatchError>,
    /// True if the deadline expired before all chunks ran.
    pub deadline_hit: bool,
}

impl<T> BatchOutcome<T> {
    pub fn attempted(&self) -> usize {
        self.results.len() + self.errors.len()
    }
}

/// Run `worker` over `items` in chunks of `batch_size`.
///
/// The deadline, if any, is checked between chunks only; a chunk that has
/// started always runs to completion so its results are kept. `progress`
/// is invoked after each chunk with (attempted, total).
pub async fn process_in_batches<I, T, E, F, Fut, P>(
    items: Vec<I>,
    batch_size: usize,
    deadline: Option<Instant>,
    mut progress: P,
    worker: F,
) -> BatchOutcome<T>
where
    E: std::fmt::Display,
    F: Fn(I) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: FnMut(usize, usize),
{
    let total = items.len();
    let batch_size = batch_size.max(1);
    let mut outcome = BatchOutcome {
        results: Vec::with_capacity(total),
        errors: Vec::new(),
        deadline_hit: false,
    };

    let mut chunk = Vec::with_capacity(batch_size);
    let mut items = items.into_iter().enumerate();

    loop {
        if let Some(deadline) = deadline
            && Instant::now() >= deadline
        {
            outcome.deadline_hit = true;
            debug!(
                attempted = outcome.attempted(),
                total, "Batch run stopped at deadline"
            );
            break;
        }

        chunk.clear();
        chunk.extend(items.by_ref().take(batch_size));
        if chunk.is_empty() {
            break;
        }

        let futures = chunk
            .drain(..)
            .map(|(index, item)| {
                let fut = worker(item);
                async move { (index, fut.await) }
            })
            .collect::<Vec<_>>();

        for (index, result) in join_all(futures).await {
            match result {
                Ok(value) => outcome.results.push(BatchItem { index, value }),
                Err(e) => outcome.errors.push(BatchError {
                    index,
                    message: e.to_string(),
                }),
            }
        }

        progress(outcome.attempted(), total);
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn every_item_is_accounted_for() {
        let items: Vec<u32> = (0..13).collect();
        let outcome = process_in_batches(items, 5, None, |_, _| {}, |n| async move {
            if n % 3 == 0 {
                Err(format!("rejected {n}"))
            } else {
                Ok(n * 2)
            }
        })
        .await;

        assert_eq!(outcome.attempted(), 13);
        assert_eq!(outcome.errors.len(), 5); // 0, 3, 6, 9, 12
        assert_eq!(outcome.results.len(), 8);
        assert!(!outcome.deadline_hit);

        // Indices map back to the original input
        for item in &outcome.results {
            assert_eq!(item.value, (item.index as u32) * 2);
        }
        assert!(outcome.errors.iter().any(|e| e.message == "rejected 9"));
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_batch_size() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let items: Vec<u32> = (0..20).collect();
        let outcome = process_in_batches(items, 4, None, |_, _| {}, |_| {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, String>(())
            }
        })
        .await;

        assert_eq!(outcome.attempted(), 20);
        assert!(peak.load(Ordering::SeqCst) <= 4);
    }

    #[tokio::test]
    async fn deadline_stops_between_chunks_keeping_partial_results() {
        let items: Vec<u32> = (0..50).collect();
        let deadline = Instant::now() + Duration::from_millis(30);
        let outcome = process_in_batches(items, 5, Some(deadline), |_, _| {}, |n| async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok::<_, String>(n)
        })
        .await;

        assert!(outcome.deadline_hit);
        assert!(outcome.attempted() < 50);
        // Whole chunks completed before the cutoff
        assert!(outcome.attempted() >= 5);
        assert_eq!(outcome.attempted() % 5, 0);
    }

    #[tokio::test]
    async fn progress_reports_cumulative_counts() {
        let mut reports = Vec::new();
        let items: Vec<u32> = (0..7).collect();
        process_in_batches(
            items,
            3,
            None,
            |done, total| reports.push((done, total)),
            |n| async move { Ok::<_, String>(n) },
        )
        .await;

        assert_eq!(reports, vec![(3, 7), (6, 7), (7, 7)]);
    }

    #[tokio::test]
    async fn empty_input_yields_empty_outcome() {
        let outcome = process_in_batches(Vec::<u32>::new(), 5, None, |_, _| {}, |n| async move {
            Ok::<_, String>(n)
        })
        .await;
        assert_eq!(outcome.attempted(), 0);
        assert!(!outcome.deadline_hit);
    }

    #[tokio::test]
    async fn zero_batch_size_is_clamped_to_one() {
        let items: Vec<u32> = (0..3).collect();
        let outcome = process_in_batches(items, 0, None, |_, _| {}, |n| async move {
            Ok::<_, String>(n)
        })
        .await;
        assert_eq!(outcome.results.len(), 3);
    }
}

//! Bounded fan-out for per-dimension work inside a phase

use anyhow::{anyhow, Result};
use futures::{stream::FuturesUnordered, Future, StreamExt};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Context provided to each item in a batch
#[derive(Debug, Clone, Copy)]
pub struct ItemContext {
    /// Phase number (for progress frames)
    pub phase: u8,
    /// Item number (1-indexed for display)
    pub item_number: usize,
    /// Total number of items in this batch
    pub total_items: usize,
}

/// Run `executor` over `items` with at most `concurrency` in flight
///
/// Results arrive in completion order, not input order. Fails fast: the
/// first error drops the remaining futures and is returned. Executors that
/// must not abort the phase should fold their failures into `R`.
pub async fn execute_batch<T, F, Fut, R>(
    phase: u8,
    items: Vec<T>,
    concurrency: usize,
    executor: F,
) -> Result<Vec<R>>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T, ItemContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    let total = items.len();
    let sem = Arc::new(Semaphore::new(concurrency.max(1)));
    let executor = Arc::new(executor);
    let mut running = FuturesUnordered::new();

    for (idx, item) in items.into_iter().enumerate() {
        let sem = sem.clone();
        let executor = executor.clone();
        let ctx = ItemContext {
            phase,
            item_number: idx + 1,
            total_items: total,
        };

        running.push(async move {
            // Blocks while `concurrency` items are running
            let _permit = sem
                .acquire()
                .await
                .map_err(|_| anyhow!("Semaphore closed"))?;

            executor(item, ctx).await
        });
    }

    let mut results = Vec::with_capacity(total);
    while let Some(result) = running.next().await {
        results.push(result?);
    }

    Ok(results)
}

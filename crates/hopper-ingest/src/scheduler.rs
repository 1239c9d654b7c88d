//! Batch planning and bounded fan-out
//!
//! Batches run one after another; the units of a batch run on a pool of at
//! most `max_workers` concurrent futures. Results come back in input order
//! no matter which future finishes first.

use futures::stream::{self, StreamExt};
use std::future::Future;

/// A contiguous slice of the pending work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch<T> {
    /// 0-based position in the plan
    pub index: usize,
    /// Number of batches in the plan
    pub total: usize,
    pub units: Vec<T>,
}

impl<T> Batch<T> {
    /// 1-based batch number, as used in logs and commit labels
    pub fn number(&self) -> usize {
        self.index + 1
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchScheduler {
    batch_size: usize,
    max_workers: usize,
}

impl BatchScheduler {
    /// Zero sizes are raised to 1
    pub fn new(batch_size: usize, max_workers: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            max_workers: max_workers.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Split `units` into consecutive, non-overlapping batches
    pub fn plan<T>(&self, units: Vec<T>) -> Vec<Batch<T>> {
        let total = units.len().div_ceil(self.batch_size);
        let mut batches = Vec::with_capacity(total);
        let mut remaining = units.into_iter().peekable();

        while remaining.peek().is_some() {
            let chunk: Vec<T> = remaining.by_ref().take(self.batch_size).collect();
            batches.push(Batch {
                index: batches.len(),
                total,
                units: chunk,
            });
        }

        batches
    }

    /// Run `work` over every unit of `batch`, stopping at the first error.
    ///
    /// In-flight futures are dropped when one fails.
    pub async fn dispatch<'a, T, R, E, F, Fut>(&self, batch: &'a Batch<T>, work: F) -> Result<Vec<R>, E>
    where
        F: Fn(&'a T) -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        let mut slots: Vec<Option<R>> = std::iter::repeat_with(|| None).take(batch.len()).collect();
        let mut results = stream::iter(batch.units.iter().enumerate())
            .map(|(idx, unit)| {
                let fut = work(unit);
                async move { (idx, fut.await) }
            })
            .buffer_unordered(self.max_workers);

        while let Some((idx, result)) = results.next().await {
            slots[idx] = Some(result?);
        }

        Ok(slots.into_iter().flatten().collect())
    }

    /// Run `work` over every unit of `batch` and wait for all of them.
    ///
    /// Use this when the work spawns blocking tasks that cannot be cancelled.
    pub async fn dispatch_all<'a, T, R, F, Fut>(&self, batch: &'a Batch<T>, work: F) -> Vec<R>
    where
        F: Fn(&'a T) -> Fut,
        Fut: Future<Output = R>,
    {
        let mut slots: Vec<Option<R>> = std::iter::repeat_with(|| None).take(batch.len()).collect();
        let mut results = stream::iter(batch.units.iter().enumerate())
            .map(|(idx, unit)| {
                let fut = work(unit);
                async move { (idx, fut.await) }
            })
            .buffer_unordered(self.max_workers);

        while let Some((idx, result)) = results.next().await {
            slots[idx] = Some(result);
        }

        slots.into_iter().flatten().collect()
    }
}

//! Bounded concurrent batches with a joined report.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::{LoaderError, Result, TableFailure};

/// Per-table results of a batch, in submission order.
#[derive(Debug)]
pub struct BatchReport<T> {
    pub results: Vec<(String, Result<T>)>,
}

impl<T> BatchReport<T> {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn failed_tables(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|(_, r)| r.is_err())
            .map(|(table, _)| table.as_str())
            .collect()
    }

    pub fn has_failures(&self) -> bool {
        self.results.iter().any(|(_, r)| r.is_err())
    }

    /// Every success, or one error listing every failed table.
    pub fn into_result(self) -> Result<Vec<T>> {
        let mut successes = Vec::with_capacity(self.results.len());
        let mut failures = Vec::new();
        for (table, result) in self.results {
            match result {
                Ok(value) => successes.push(value),
                Err(error) => failures.push(TableFailure { table, error }),
            }
        }
        if failures.is_empty() {
            Ok(successes)
        } else {
            Err(LoaderError::Batch(failures))
        }
    }
}

/// Runs `work` for every item with at most `concurrency` in flight.
///
/// Items waiting for a slot when `cancel` fires are reported as cancelled.
/// Running items are handed the same token and must stop on their own, so
/// they get the chance to abort server-side work and roll back.
pub async fn run_batch<I, T, F, Fut>(
    items: Vec<(String, I)>,
    concurrency: usize,
    cancel: &CancellationToken,
    work: F,
) -> BatchReport<T>
where
    F: Fn(I, CancellationToken) -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut join_set = JoinSet::new();
    let names: Vec<String> = items.iter().map(|(name, _)| name.clone()).collect();

    for (idx, (name, item)) in items.into_iter().enumerate() {
        let semaphore = Arc::clone(&semaphore);
        let token = cancel.clone();
        let task = work(item, cancel.clone());

        join_set.spawn(async move {
            let _permit = tokio::select! {
                biased;
                _ = token.cancelled() => return (idx, Err(LoaderError::Cancelled(name))),
                permit = semaphore.acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return (idx, Err(LoaderError::Cancelled(name))),
                },
            };

            // a started task sees the same token and winds itself down
            (idx, task.await)
        });
    }

    let mut slots: Vec<Option<Result<T>>> = names.iter().map(|_| None).collect();
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((idx, result)) => {
                match &result {
                    Ok(_) => info!("finished {}", names[idx]),
                    Err(e) => error!(
                        table = %names[idx],
                        category = ?e.category(),
                        "error loading table {}: {}",
                        names[idx],
                        e
                    ),
                }
                slots[idx] = Some(result);
            }
            Err(e) => error!("batch task failed: {}", e),
        }
    }

    let results = names
        .into_iter()
        .zip(slots)
        .map(|(name, slot)| {
            let result = slot.unwrap_or_else(|| {
                Err(LoaderError::Database(format!(
                    "refresh task for {} ended without a result",
                    name
                )))
            });
            (name, result)
        })
        .collect();

    BatchReport { results }
}

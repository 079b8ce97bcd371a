/// Worker Pool
///
/// A fixed number of workers draining a shared queue. Used by every concurrent stage
/// (downloads, extraction, tables, files within a table).
///
/// The first job error halts submission: workers stop picking up new items, but jobs already
/// running finish. Cancellation behaves the same way. The pool always waits for every worker
/// before returning.
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Run `job` over `items` with at most `workers` jobs in flight.
///
/// Returns the first error observed. When the pool stopped because of cancellation with items
/// still queued, returns [`Error::Cancelled`].
pub async fn run_pool<T, F, Fut>(
    stage: &'static str,
    items: Vec<T>,
    workers: usize,
    cancel: &CancellationToken,
    job: F,
) -> Result<()>
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    if items.is_empty() {
        return Ok(());
    }

    let workers = workers.max(1).min(items.len());
    tracing::debug!(stage, workers, items = items.len(), "starting worker pool");

    let queue = Arc::new(Mutex::new(items.into_iter().collect::<VecDeque<T>>()));
    let halted = Arc::new(AtomicBool::new(false));
    let first_error: Arc<Mutex<Option<Error>>> = Arc::new(Mutex::new(None));
    let job = Arc::new(job);

    let mut set = JoinSet::new();
    for worker in 0..workers {
        let queue = Arc::clone(&queue);
        let halted = Arc::clone(&halted);
        let first_error = Arc::clone(&first_error);
        let job = Arc::clone(&job);
        let cancel = cancel.clone();

        set.spawn(async move {
            loop {
                if halted.load(Ordering::SeqCst) || cancel.is_cancelled() {
                    break;
                }

                let next = queue.lock().await.pop_front();
                let Some(item) = next else {
                    break;
                };

                if let Err(e) = (*job)(item).await {
                    tracing::error!(stage, worker, error = %e, "job failed, halting pool");
                    halted.store(true, Ordering::SeqCst);
                    let mut slot = first_error.lock().await;
                    if slot.is_none() {
                        *slot = Some(e);
                    }
                    break;
                }
            }
        });
    }

    while let Some(joined) = set.join_next().await {
        if let Err(e) = joined {
            halted.store(true, Ordering::SeqCst);
            let mut slot = first_error.lock().await;
            if slot.is_none() {
                *slot = Some(Error::Worker(format!("{} worker: {}", stage, e)));
            }
        }
    }

    if let Some(e) = first_error.lock().await.take() {
        return Err(e);
    }

    let remaining = queue.lock().await.len();
    if remaining > 0 {
        tracing::warn!(stage, remaining, "pool cancelled with work left");
        return Err(Error::Cancelled);
    }

    Ok(())
}

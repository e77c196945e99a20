/*!
 * Collectors: turn topology facts into scored results
 *
 * Both collectors fan out across their units of work (namespaces, groups)
 * with at most `maxParallelism` tasks in flight. A unit that fails is
 * recorded in its own result and never fails its siblings.
 */

pub mod namespace;
pub mod replication;
pub mod scoring;

pub use namespace::NamespaceCollector;
pub use replication::ReplicationCollector;

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::error::{MonitorError, Result};

/// Run `work` over `items` with bounded parallelism
///
/// Results come back in input order. A slot is `None` when its task
/// panicked. Cancellation aborts every outstanding task.
pub(crate) async fn run_bounded<T, R, F, Fut>(
    items: Vec<T>,
    max_parallelism: usize,
    cancel: &CancellationToken,
    work: F,
) -> Result<Vec<Option<R>>>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut,
    Fut: Future<Output = R> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(max_parallelism.max(1)));
    let mut tasks = JoinSet::new();
    let mut results: Vec<Option<R>> = Vec::with_capacity(items.len());

    for (index, item) in items.into_iter().enumerate() {
        results.push(None);
        let semaphore = semaphore.clone();
        let unit = work(item);
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            (index, unit.await)
        });
    }

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tasks.abort_all();
                return Err(MonitorError::Cancelled);
            }
            joined = tasks.join_next() => match joined {
                None => break,
                Some(Ok((index, value))) => results[index] = Some(value),
                Some(Err(e)) => error!(error = %e, "collector task did not complete"),
            }
        }
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_results_keep_input_order_and_bound() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let results = run_bounded(
            (0..10u64).collect(),
            3,
            &CancellationToken::new(),
            |n| {
                let in_flight = in_flight.clone();
                let peak = peak.clone();
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20 - n)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    n * 2
                }
            },
        )
        .await
        .unwrap();

        let values: Vec<u64> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, (0..10).map(|n| n * 2).collect::<Vec<_>>());
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_panicking_unit_leaves_empty_slot() {
        let results = run_bounded(vec![1, 2, 3], 2, &CancellationToken::new(), |n| async move {
            if n == 2 {
                panic!("unit failed");
            }
            n
        })
        .await
        .unwrap();

        assert_eq!(results, vec![Some(1), None, Some(3)]);
    }

    #[tokio::test]
    async fn test_cancellation_aborts() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = run_bounded(vec![(); 4], 2, &cancel, |_| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        })
        .await
        .unwrap_err();
        assert!(err.is_cancelled());
    }
}

/*!
 * Retry logic with linear backoff for topology queries
 */

use std::future::Future;
use std::time::Duration;

use dfsmon_topology::TopologyError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{MonitorError, Result};

/// Backoff unit: the n-th retry waits `n * RETRY_BACKOFF_STEP`
pub const RETRY_BACKOFF_STEP: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first
    pub retries: u32,
    pub backoff_step: Duration,
    /// Bound for each individual attempt
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            retries: config.collection.retry_count,
            backoff_step: RETRY_BACKOFF_STEP,
            attempt_timeout: config.request_timeout(),
        }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff_step * attempt
    }
}

/// Run a provider query, retrying every failure up to `policy.retries` times
///
/// Each attempt is bounded by `policy.attempt_timeout`; a timed out attempt
/// counts as a `TopologyError::Timeout`. Cancellation interrupts both the
/// query and the backoff sleep.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    context: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = dfsmon_topology::Result<T>>,
{
    let mut attempt = 0;
    loop {
        if attempt > 0 {
            let delay = policy.delay_for(attempt);
            debug!(context, attempt, ?delay, "retrying topology query");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(MonitorError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(MonitorError::Cancelled),
            res = tokio::time::timeout(policy.attempt_timeout, operation()) => res,
        };

        let err = match outcome {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => e,
            Err(_) => TopologyError::Timeout(policy.attempt_timeout),
        };

        if attempt >= policy.retries {
            warn!(context, attempts = attempt + 1, error = %err, "topology query failed");
            return Err(MonitorError::provider(context, err));
        }

        debug!(context, transient = err.is_transient(), error = %err, "topology query attempt failed");
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(retries: u32) -> RetryPolicy {
        RetryPolicy {
            retries,
            backoff_step: Duration::from_millis(250),
            attempt_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();

        let value = with_retry(&policy(2), &CancellationToken::new(), "ns", || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(TopologyError::CommandFailed("busy".into()))
            } else {
                Ok(n)
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 250ms + 500ms of linear backoff
        assert!(started.elapsed() >= Duration::from_millis(750));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_retry_budget() {
        let calls = AtomicU32::new(0);

        let err = with_retry(&policy(1), &CancellationToken::new(), "ns", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(TopologyError::NotFound("gone".into()))
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(matches!(err, MonitorError::Provider { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_attempt_times_out() {
        let mut policy = policy(0);
        policy.attempt_timeout = Duration::from_secs(1);

        let err = with_retry(&policy, &CancellationToken::new(), "slow", || async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        })
        .await
        .unwrap_err();

        match err {
            MonitorError::Provider { source, .. } => {
                assert!(matches!(source, TopologyError::Timeout(_)))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_cancel_interrupts() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = with_retry(&policy(3), &cancel, "ns", || async {
            Err::<(), _>(TopologyError::CommandFailed("x".into()))
        })
        .await
        .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_linear_delays() {
        let p = policy(3);
        assert_eq!(p.delay_for(1), Duration::from_millis(250));
        assert_eq!(p.delay_for(3), Duration::from_millis(750));
    }
}

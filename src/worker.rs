/*!
 * Worker loop: schedules collection runs until shutdown
 */

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::{MonitorError, Result};
use crate::orchestrator::{Orchestrator, TRIGGER_MANUAL, TRIGGER_SCHEDULE};
use crate::wake::{wait_for_wake, WakeReason, WakeSignal};

/// Pause after an unexpected cycle failure
pub const ERROR_RETRY_DELAY: Duration = Duration::from_secs(15);

pub struct Worker {
    orchestrator: Arc<Orchestrator>,
    wake: WakeSignal,
    error_delay: Duration,
}

impl Worker {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        let wake = orchestrator.wake();
        Self {
            orchestrator,
            wake,
            error_delay: ERROR_RETRY_DELAY,
        }
    }

    pub fn with_error_delay(mut self, delay: Duration) -> Self {
        self.error_delay = delay;
        self
    }

    /// Main loop - returns only once `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) {
        info!("🛰️  dfsmon worker online");
        let mut signalled = false;

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            match self.cycle(signalled, &shutdown).await {
                Ok(delay) => match wait_for_wake(delay, &self.wake, &shutdown).await {
                    WakeReason::Shutdown => break,
                    WakeReason::Signal => {
                        debug!("worker woken by signal");
                        signalled = true;
                    }
                    WakeReason::Timer => signalled = false,
                },
                Err(e) if e.is_cancelled() || shutdown.is_cancelled() => break,
                Err(e) => {
                    error!(error = %e, retry_in = ?self.error_delay, "❌ worker cycle failed");
                    signalled = false;
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.error_delay) => {}
                    }
                }
            }
        }

        info!("worker stopped");
    }

    /// One pass: drain commands, run a collection, return the idle delay
    async fn cycle(&self, signalled: bool, shutdown: &CancellationToken) -> Result<Duration> {
        let config = self.orchestrator.load_config().await?;

        if shutdown.is_cancelled() {
            return Err(MonitorError::Cancelled);
        }
        let commands = self.orchestrator.dequeue_commands().await?;
        for command in &commands {
            if shutdown.is_cancelled() {
                return Err(MonitorError::Cancelled);
            }
            info!(
                id = %command.id,
                requested_by = %command.requested_by,
                reason = command.reason.as_deref().unwrap_or(""),
                "processing collect-now command"
            );
        }

        let trigger = if !commands.is_empty() || signalled {
            TRIGGER_MANUAL
        } else {
            TRIGGER_SCHEDULE
        };

        self.orchestrator.run_collection(trigger, shutdown).await?;
        Ok(config.effective_poll_interval())
    }
}

/*!
 * Orchestrator: one collection run from config to persisted snapshot
 *
 * Also the facade exposed to surrounding layers (CLI, API host): load and
 * save configuration, trigger or enqueue runs, read runtime state and the
 * latest snapshot. Stores, collectors and the topology provider are
 * constructed once and injected here.
 */

use chrono::Utc;
use dfsmon_topology::TopologyProvider;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::collector::replication::ReplicationReport;
use crate::collector::{NamespaceCollector, ReplicationCollector};
use crate::config::{Config, ServiceSettings, StorageSettings};
use crate::error::{MonitorError, Result, SaveOutcome};
use crate::model::Snapshot;
use crate::store::{
    Command, CommandQueue, ConfigStore, FlushReport, RunOutcome, RuntimeState, RuntimeStateStore,
    StatusStore,
};
use crate::wake::WakeSignal;

pub const TRIGGER_SCHEDULE: &str = "schedule";
pub const TRIGGER_MANUAL: &str = "manual";

pub struct Orchestrator {
    config_store: ConfigStore,
    runtime: RuntimeStateStore,
    runtime_root: PathBuf,
    runtime_path: PathBuf,
    commands: CommandQueue,
    status: StatusStore,
    namespaces: NamespaceCollector,
    replication: ReplicationCollector,
    wake: WakeSignal,
}

impl Orchestrator {
    /// Wire the stores and collectors
    ///
    /// `storage` fixes where runtime state and commands live for the
    /// lifetime of the process; snapshot roots are read from the config
    /// document on every run.
    pub fn new(
        config_store: ConfigStore,
        storage: &StorageSettings,
        provider: Arc<dyn TopologyProvider>,
    ) -> Self {
        let (runtime_root, runtime_path) = storage.runtime_state_location();
        Self {
            config_store,
            runtime: RuntimeStateStore,
            runtime_root,
            runtime_path,
            commands: CommandQueue::new(storage.command_queue_dir()),
            status: StatusStore,
            namespaces: NamespaceCollector::new(provider.clone()),
            replication: ReplicationCollector::new(provider),
            wake: WakeSignal::new(),
        }
    }

    /// Build from bootstrap settings, loading (or creating) the config
    /// document to learn the storage layout
    pub async fn bootstrap(
        settings: &ServiceSettings,
        provider: Arc<dyn TopologyProvider>,
    ) -> Result<Self> {
        let store = ConfigStore::new(&settings.config_path, &settings.cache_root);
        let config = store.load().await?;
        Ok(Self::new(store, &config.storage, provider))
    }

    pub fn with_wake(mut self, wake: WakeSignal) -> Self {
        self.wake = wake;
        self
    }

    pub fn wake(&self) -> WakeSignal {
        self.wake.clone()
    }

    pub fn command_queue(&self) -> &CommandQueue {
        &self.commands
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Configuration
    // ═══════════════════════════════════════════════════════════════════════

    pub async fn load_config(&self) -> Result<Config> {
        self.config_store.load().await
    }

    pub async fn save_config(&self, config: &Config) -> Result<SaveOutcome> {
        self.config_store.save(config).await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Collection
    // ═══════════════════════════════════════════════════════════════════════

    /// Run every enabled collector and persist the snapshot
    ///
    /// Runtime state is marked running before the collectors start and
    /// finished afterwards, whatever the outcome. A cancelled run persists
    /// no snapshot.
    pub async fn run_collection(&self, trigger: &str, cancel: &CancellationToken) -> Result<Snapshot> {
        let config = self.load_config().await?;

        let previous = match self.get_runtime_state().await {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "runtime state unreadable, starting fresh");
                RuntimeState::default()
            }
        };
        let running = self.save_state(&RuntimeState::started(previous, trigger)).await?;
        info!(trigger, version = config.version, "collection started");

        let outcome = self.collect_and_persist(&config, trigger, cancel).await;

        let finished = match &outcome {
            Ok(snapshot) => {
                info!(
                    trigger,
                    health = %snapshot.overall_health,
                    namespaces = snapshot.namespaces.len(),
                    groups = snapshot.replication_groups.len(),
                    "collection completed"
                );
                running.finished(RunOutcome::Completed, None)
            }
            Err(MonitorError::Cancelled) => {
                info!(trigger, "collection cancelled");
                running.finished(RunOutcome::Cancelled, Some("cancelled".to_string()))
            }
            Err(e) => {
                warn!(trigger, error = %e, "collection failed");
                running.finished(RunOutcome::Failed, Some(e.to_string()))
            }
        };

        if let Err(e) = self.save_state(&finished).await {
            warn!(error = %e, "failed to record collection outcome");
        }
        outcome
    }

    async fn collect_and_persist(
        &self,
        config: &Config,
        trigger: &str,
        cancel: &CancellationToken,
    ) -> Result<Snapshot> {
        ensure_running(cancel)?;
        let namespaces = if config.collectors.namespace {
            self.namespaces.collect(config, cancel).await?
        } else {
            Vec::new()
        };

        ensure_running(cancel)?;
        let replication = if config.collectors.replication {
            self.replication.collect(config, cancel).await?
        } else {
            ReplicationReport::default()
        };

        ensure_running(cancel)?;
        let snapshot = Snapshot::assemble(
            Utc::now(),
            Some(trigger.to_string()),
            namespaces,
            replication.groups,
            replication.errors,
        );

        let flush = self
            .status
            .save_snapshot(
                &snapshot,
                &config.storage.status_root,
                &config.storage.local_cache_root,
            )
            .await?;
        if flush.pending > 0 {
            info!(pending = flush.pending, "snapshots queued for remote status root");
        }
        Ok(snapshot)
    }

    /// Queue a "collect now" request and wake the worker
    pub async fn enqueue_collect_now(
        &self,
        requested_by: &str,
        reason: Option<String>,
    ) -> Result<Command> {
        let command = Command::collect_now(requested_by, reason);
        self.commands.enqueue(&command).await?;
        self.wake.notify();
        info!(id = %command.id, requested_by, "collect-now requested");
        Ok(command)
    }

    pub async fn dequeue_commands(&self) -> Result<Vec<Command>> {
        self.commands.dequeue_all().await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Observation
    // ═══════════════════════════════════════════════════════════════════════

    pub async fn get_runtime_state(&self) -> Result<RuntimeState> {
        self.runtime.load(&self.runtime_root, &self.runtime_path).await
    }

    pub async fn load_latest_snapshot(&self) -> Result<Option<Snapshot>> {
        let config = self.load_config().await?;
        self.status
            .load_latest(&config.storage.status_root, &config.storage.local_cache_root)
            .await
    }

    /// Push pending snapshots to the remote status root
    pub async fn flush_outbox(&self) -> Result<FlushReport> {
        let config = self.load_config().await?;
        self.status
            .flush_outbox(&config.storage.status_root, &config.storage.local_cache_root)
            .await
    }

    async fn save_state(&self, state: &RuntimeState) -> Result<RuntimeState> {
        self.runtime
            .save(&self.runtime_root, &self.runtime_path, state)
            .await
    }
}

fn ensure_running(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(MonitorError::Cancelled)
    } else {
        Ok(())
    }
}

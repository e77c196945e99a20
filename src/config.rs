/*!
 * Configuration types for dfsmon
 *
 * Two layers: `ServiceSettings` bootstraps the process from an optional TOML
 * file (where the shared config lives, where the local cache lives, logging),
 * and `Config` is the versioned monitoring document persisted by the config
 * store as camelCase JSON.
 */

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{MonitorError, Result};

/// Shortest pause between two scheduled collection runs
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Shortest per-target probe timeout
pub const MIN_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Bootstrap settings for the service process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSettings {
    /// Primary (shared) config document, e.g. on a file share
    #[serde(default = "default_config_path")]
    pub config_path: PathBuf,

    /// Durable local root: config cache, snapshots, outbox, commands, runtime state
    #[serde(default = "default_cache_root")]
    pub cache_root: PathBuf,

    /// Topology inventory consumed by the inventory provider
    #[serde(default = "default_inventory_path")]
    pub inventory_path: PathBuf,

    #[serde(default)]
    pub log_level: LogLevel,

    /// Log file path (None = stdout)
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Watch the command directory so other processes can wake the worker
    #[serde(default = "default_true")]
    pub watch_commands: bool,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            config_path: default_config_path(),
            cache_root: default_cache_root(),
            inventory_path: default_inventory_path(),
            log_level: LogLevel::Info,
            log_file: None,
            watch_commands: true,
        }
    }
}

impl ServiceSettings {
    /// Load settings from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| MonitorError::io(path, e))?;
        toml::from_str(&contents)
            .map_err(|e| MonitorError::Config(format!("{}: {}", path.display(), e)))
    }
}

fn default_config_path() -> PathBuf {
    PathBuf::from("shared").join("config.json")
}

fn default_cache_root() -> PathBuf {
    PathBuf::from("cache")
}

fn default_inventory_path() -> PathBuf {
    PathBuf::from("inventory.json")
}

fn default_true() -> bool {
    true
}

/// Logging level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// The versioned monitoring configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub storage: StorageSettings,

    #[serde(default)]
    pub collection: CollectionSettings,

    #[serde(default)]
    pub namespaces: Vec<NamespaceDefinition>,

    #[serde(default)]
    pub replication: ReplicationSettings,

    #[serde(default)]
    pub collectors: CollectorToggles,

    /// Incremented by the config store on every save
    #[serde(default = "default_version")]
    pub version: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageSettings::default(),
            collection: CollectionSettings::default(),
            namespaces: Vec::new(),
            replication: ReplicationSettings::default(),
            collectors: CollectorToggles::default(),
            version: default_version(),
            updated_at: None,
        }
    }
}

fn default_version() -> u64 {
    1
}

/// Where snapshots, runtime state and commands live
///
/// Relative `runtime_state_path` and `command_queue_path` resolve against
/// `local_cache_root`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageSettings {
    #[serde(default = "default_config_path")]
    pub config_path: PathBuf,

    /// Remote root that receives `status/<y>/<m>/<d>/...`
    #[serde(default = "default_status_root")]
    pub status_root: PathBuf,

    #[serde(default = "default_cache_root")]
    pub local_cache_root: PathBuf,

    #[serde(default = "default_runtime_state_path")]
    pub runtime_state_path: PathBuf,

    #[serde(default = "default_command_queue_path")]
    pub command_queue_path: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            config_path: default_config_path(),
            status_root: default_status_root(),
            local_cache_root: default_cache_root(),
            runtime_state_path: default_runtime_state_path(),
            command_queue_path: default_command_queue_path(),
        }
    }
}

impl StorageSettings {
    /// Storage layout derived from where the config document lives
    pub fn for_locations(config_path: &Path, local_cache_root: &Path) -> Self {
        let status_root = config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(default_status_root);
        Self {
            config_path: config_path.to_path_buf(),
            status_root,
            local_cache_root: local_cache_root.to_path_buf(),
            ..Self::default()
        }
    }

    pub fn runtime_state_location(&self) -> (PathBuf, PathBuf) {
        (
            self.local_cache_root.clone(),
            self.runtime_state_path.clone(),
        )
    }

    pub fn command_queue_dir(&self) -> PathBuf {
        self.local_cache_root.join(&self.command_queue_path)
    }
}

fn default_status_root() -> PathBuf {
    PathBuf::from("shared")
}

fn default_runtime_state_path() -> PathBuf {
    PathBuf::from("runtime-state.json")
}

fn default_command_queue_path() -> PathBuf {
    PathBuf::from("commands")
}

/// Collection tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSettings {
    #[serde(default = "default_polling_interval")]
    pub polling_interval_seconds: u64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,

    /// Additional attempts after the first failed provider query
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    #[serde(default = "default_max_parallelism")]
    pub max_parallelism: usize,

    /// Maximum recent warnings kept per replication member
    #[serde(default = "default_event_sample_count")]
    pub event_sample_count: usize,

    #[serde(default)]
    pub thresholds: Thresholds,
}

impl Default for CollectionSettings {
    fn default() -> Self {
        Self {
            polling_interval_seconds: default_polling_interval(),
            request_timeout_seconds: default_request_timeout(),
            retry_count: default_retry_count(),
            max_parallelism: default_max_parallelism(),
            event_sample_count: default_event_sample_count(),
            thresholds: Thresholds::default(),
        }
    }
}

fn default_polling_interval() -> u64 {
    300
}

fn default_request_timeout() -> u64 {
    15
}

fn default_retry_count() -> u32 {
    2
}

fn default_max_parallelism() -> usize {
    8
}

fn default_event_sample_count() -> usize {
    100
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thresholds {
    #[serde(default = "default_warn_unreachable")]
    pub warn_unreachable_targets: usize,

    #[serde(default = "default_critical_unreachable")]
    pub critical_unreachable_targets: usize,

    #[serde(default = "default_warn_backlog")]
    pub warn_backlog: u64,

    #[serde(default = "default_critical_backlog")]
    pub critical_backlog: u64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            warn_unreachable_targets: default_warn_unreachable(),
            critical_unreachable_targets: default_critical_unreachable(),
            warn_backlog: default_warn_backlog(),
            critical_backlog: default_critical_backlog(),
        }
    }
}

fn default_warn_unreachable() -> usize {
    1
}

fn default_critical_unreachable() -> usize {
    3
}

fn default_warn_backlog() -> u64 {
    50
}

fn default_critical_backlog() -> u64 {
    250
}

/// A namespace root to monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceDefinition {
    pub id: String,
    pub path: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl NamespaceDefinition {
    pub fn new(id: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationSettings {
    #[serde(default = "default_true")]
    pub auto_discover_groups: bool,

    #[serde(default)]
    pub explicit_groups: Vec<String>,
}

impl Default for ReplicationSettings {
    fn default() -> Self {
        Self {
            auto_discover_groups: true,
            explicit_groups: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectorToggles {
    #[serde(default = "default_true")]
    pub namespace: bool,

    #[serde(default = "default_true")]
    pub replication: bool,

    /// Sample recent warning/error log entries per replication member
    #[serde(default = "default_true")]
    pub event_log: bool,
}

impl Default for CollectorToggles {
    fn default() -> Self {
        Self {
            namespace: true,
            replication: true,
            event_log: true,
        }
    }
}

impl Config {
    /// Default document for a store rooted at the given locations
    pub fn with_storage(storage: StorageSettings) -> Self {
        Self {
            storage,
            ..Self::default()
        }
    }

    pub fn from_json(raw: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Reject documents the collectors cannot run with
    pub fn validate(&self) -> Result<()> {
        let collection = &self.collection;
        if collection.max_parallelism == 0 {
            return Err(MonitorError::Config(
                "maxParallelism must be at least 1".to_string(),
            ));
        }

        let t = &collection.thresholds;
        if t.warn_unreachable_targets > t.critical_unreachable_targets {
            return Err(MonitorError::Config(format!(
                "warnUnreachableTargets ({}) exceeds criticalUnreachableTargets ({})",
                t.warn_unreachable_targets, t.critical_unreachable_targets
            )));
        }
        if t.warn_backlog > t.critical_backlog {
            return Err(MonitorError::Config(format!(
                "warnBacklog ({}) exceeds criticalBacklog ({})",
                t.warn_backlog, t.critical_backlog
            )));
        }

        let mut seen = HashSet::new();
        for ns in &self.namespaces {
            if ns.path.trim().is_empty() {
                return Err(MonitorError::Config(format!(
                    "namespace '{}' has an empty path",
                    ns.id
                )));
            }
            if !seen.insert(ns.id.to_ascii_lowercase()) {
                return Err(MonitorError::Config(format!(
                    "duplicate namespace id '{}'",
                    ns.id
                )));
            }
        }

        Ok(())
    }

    /// Pause between scheduled runs, never shorter than `MIN_POLL_INTERVAL`
    pub fn effective_poll_interval(&self) -> Duration {
        Duration::from_secs(self.collection.polling_interval_seconds).max(MIN_POLL_INTERVAL)
    }

    /// Per-target reachability probe timeout
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.collection.request_timeout_seconds).max(MIN_PROBE_TIMEOUT)
    }

    /// Bound for each provider query
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.collection.request_timeout_seconds.max(1))
    }
}

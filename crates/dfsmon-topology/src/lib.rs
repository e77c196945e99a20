//! dfsmon Topology: Query Abstraction for Namespace and Replication Facts
//!
//! This crate defines the `TopologyProvider` trait, the only seam through which
//! dfsmon learns anything about the monitored estate. The collectors never talk
//! to a management surface directly; they ask a provider for facts and
//! interpret the answers.
//!
//! # Architecture
//!
//! The `TopologyProvider` trait provides two categories of operations:
//!
//! 1. **Namespace**: list folder targets of a namespace, probe a target for reachability
//! 2. **Replication**: discover groups, list members, connections, replicated
//!    folders and query backlog between two members
//!
//! # Example
//!
//! ```rust,no_run
//! use dfsmon_topology::TopologyProvider;
//!
//! async fn list_targets(provider: &dyn TopologyProvider) -> dfsmon_topology::Result<()> {
//!     for fact in provider.list_folder_targets(r"\\corp\files").await? {
//!         let probe = provider.probe_target(&fact.target_unc_path).await;
//!         println!("{} reachable={}", fact.target_unc_path, probe.reachable);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! Implementations:
//! - **InventoryTopology**: facts from a JSON inventory file, reachability via DNS + SMB port
//! - **MockTopology** (feature `mock`): in-memory programmable provider for tests

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub mod inventory;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use inventory::InventoryTopology;

#[cfg(any(test, feature = "mock"))]
pub use mock::MockTopology;

#[derive(Error, Debug)]
pub enum TopologyError {
    #[error("Query failed: {0}")]
    CommandFailed(String),

    #[error("Query timed out after {0:?}")]
    Timeout(Duration),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed topology data: {0}")]
    Parse(String),
}

impl TopologyError {
    /// Whether a retry has a reasonable chance of succeeding
    pub fn is_transient(&self) -> bool {
        match self {
            TopologyError::CommandFailed(_) | TopologyError::Timeout(_) => true,
            TopologyError::Io(err) => {
                use std::io::ErrorKind::*;
                matches!(
                    err.kind(),
                    ConnectionRefused
                        | ConnectionReset
                        | ConnectionAborted
                        | NotConnected
                        | BrokenPipe
                        | TimedOut
                        | Interrupted
                        | WouldBlock
                )
            }
            TopologyError::NotFound(_) | TopologyError::Parse(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, TopologyError>;

/// One folder target row of a namespace, as reported by the management surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderTargetFact {
    /// Namespace folder the target backs
    pub folder_path: String,

    /// Physical location, e.g. `\\fs01\share`
    pub target_unc_path: String,

    /// Referral priority class as reported (free-form, normalized by the collector)
    #[serde(default)]
    pub priority_class: Option<String>,

    /// Rank within the priority class
    #[serde(default)]
    pub priority_rank: Option<i64>,

    /// Raw target state, e.g. `Online` / `Offline`
    #[serde(default)]
    pub raw_state: Option<String>,
}

/// Result of a single reachability probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeOutcome {
    pub reachable: bool,
    pub latency_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProbeOutcome {
    pub fn reachable(latency_ms: u64) -> Self {
        Self {
            reachable: true,
            latency_ms: Some(latency_ms),
            error: None,
        }
    }

    pub fn unreachable(latency_ms: Option<u64>, error: impl Into<String>) -> Self {
        Self {
            reachable: false,
            latency_ms,
            error: Some(error.into()),
        }
    }
}

/// A replication group member
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberFact {
    pub name: String,

    /// Replication service state, e.g. `Running` / `Stopped`
    pub service_state: String,

    /// Recent warning/error log entries, newest first
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// A directed replication connection between two members
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionFact {
    pub source: String,
    pub destination: String,
}

/// Backlog between two members for one replicated folder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacklogFact {
    pub count: Option<u64>,
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl BacklogFact {
    pub fn counted(count: u64) -> Self {
        Self {
            count: Some(count),
            state: "Ok".to_string(),
            details: None,
        }
    }

    pub fn unknown(details: impl Into<String>) -> Self {
        Self {
            count: None,
            state: "Unknown".to_string(),
            details: Some(details.into()),
        }
    }
}

/// Source of topology facts for the collectors
///
/// Every query may fail with a `TopologyError`; the caller owns retry,
/// timeout and isolation policy. `probe_target` never fails: an
/// unreachable target is a normal outcome, not an error.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync + 'static` because collectors
/// fan out across tokio tasks sharing one provider.
#[async_trait]
pub trait TopologyProvider: Send + Sync + 'static {
    // ═══════════════════════════════════════════════════════════════════════
    // 1. Namespace
    // ═══════════════════════════════════════════════════════════════════════

    /// List every folder target below a namespace root
    async fn list_folder_targets(&self, namespace_path: &str) -> Result<Vec<FolderTargetFact>>;

    /// Check whether a target is reachable, measuring latency
    async fn probe_target(&self, unc_path: &str) -> ProbeOutcome;

    // ═══════════════════════════════════════════════════════════════════════
    // 2. Replication
    // ═══════════════════════════════════════════════════════════════════════

    /// Enumerate replication groups visible to the provider
    async fn discover_replication_groups(&self) -> Result<Vec<String>>;

    async fn list_members(&self, group: &str) -> Result<Vec<MemberFact>>;

    async fn list_connections(&self, group: &str) -> Result<Vec<ConnectionFact>>;

    async fn list_replicated_folders(&self, group: &str) -> Result<Vec<String>>;

    /// Backlog from `source` to `destination`; `folder = None` means the
    /// folder is unknown and the provider should report what it can.
    async fn query_backlog(
        &self,
        group: &str,
        source: &str,
        destination: &str,
        folder: Option<&str>,
    ) -> Result<BacklogFact>;
}

/// Split a UNC path into `(server, share)`
///
/// Accepts both `\\server\share\rest` and `//server/share/rest`. Missing
/// components come back as empty strings.
pub fn parse_unc(unc_path: &str) -> (String, String) {
    let trimmed = unc_path.trim_start_matches(['\\', '/']);
    let mut parts = trimmed.split(['\\', '/']).filter(|p| !p.is_empty());
    let server = parts.next().unwrap_or_default().to_string();
    let share = parts.next().unwrap_or_default().to_string();
    (server, share)
}

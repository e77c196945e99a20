//! Inventory-backed implementation of TopologyProvider
//!
//! Facts come from a JSON inventory file maintained by operators (or
//! exported by a management script). The file is re-read on every query so
//! edits take effect on the next collection without a restart.
//!
//! Reachability is checked the way an SMB client would start: resolve the
//! server name, then open a TCP connection to the SMB port.
//!
//! ```json
//! {
//!   "namespaces": {
//!     "\\\\corp\\files": [
//!       { "folderPath": "\\\\corp\\files\\eng", "targetUncPath": "\\\\fs01\\eng",
//!         "priorityClass": "SiteCostNormal", "priorityRank": 0, "rawState": "Online" }
//!     ]
//!   },
//!   "replicationGroups": {
//!     "eng-rg": {
//!       "members": [ { "name": "fs01", "serviceState": "Running" } ],
//!       "connections": [ { "source": "fs01", "destination": "fs02" } ],
//!       "folders": [ "eng" ],
//!       "backlogs": [ { "source": "fs01", "destination": "fs02", "folder": "eng", "count": 12 } ]
//!     }
//!   }
//! }
//! ```

use crate::{
    parse_unc, BacklogFact, ConnectionFact, FolderTargetFact, MemberFact, ProbeOutcome, Result,
    TopologyError, TopologyProvider,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::net::TcpStream;
use tracing::debug;

/// Default SMB port used by reachability probes
pub const SMB_PORT: u16 = 445;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Inventory {
    #[serde(default)]
    pub namespaces: BTreeMap<String, Vec<FolderTargetFact>>,

    #[serde(default)]
    pub replication_groups: BTreeMap<String, GroupInventory>,

    #[serde(default)]
    pub smb_port: Option<u16>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupInventory {
    #[serde(default)]
    pub members: Vec<MemberFact>,
    #[serde(default)]
    pub connections: Vec<ConnectionFact>,
    #[serde(default)]
    pub folders: Vec<String>,
    #[serde(default)]
    pub backlogs: Vec<BacklogRecord>,
}

/// A backlog count captured out of band (e.g. by a scheduled export)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacklogRecord {
    pub source: String,
    pub destination: String,
    #[serde(default)]
    pub folder: Option<String>,
    pub count: u64,
}

/// Topology provider reading facts from an inventory file
#[derive(Debug, Clone)]
pub struct InventoryTopology {
    path: PathBuf,
}

impl InventoryTopology {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Inventory> {
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TopologyError::NotFound(format!("inventory {}", self.path.display()))
            } else {
                TopologyError::Io(e)
            }
        })?;
        serde_json::from_str(&raw)
            .map_err(|e| TopologyError::Parse(format!("{}: {}", self.path.display(), e)))
    }

    async fn group(&self, group: &str) -> Result<GroupInventory> {
        let inventory = self.load().await?;
        inventory
            .replication_groups
            .into_iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(group))
            .map(|(_, g)| g)
            .ok_or_else(|| TopologyError::NotFound(format!("replication group {}", group)))
    }
}

#[async_trait]
impl TopologyProvider for InventoryTopology {
    async fn list_folder_targets(&self, namespace_path: &str) -> Result<Vec<FolderTargetFact>> {
        let inventory = self.load().await?;
        inventory
            .namespaces
            .into_iter()
            .find(|(path, _)| path.eq_ignore_ascii_case(namespace_path))
            .map(|(_, targets)| targets)
            .ok_or_else(|| TopologyError::NotFound(format!("namespace {}", namespace_path)))
    }

    async fn probe_target(&self, unc_path: &str) -> ProbeOutcome {
        let port = match self.load().await {
            Ok(inventory) => inventory.smb_port.unwrap_or(SMB_PORT),
            Err(_) => SMB_PORT,
        };
        probe_smb(unc_path, port).await
    }

    async fn discover_replication_groups(&self) -> Result<Vec<String>> {
        let inventory = self.load().await?;
        Ok(inventory.replication_groups.into_keys().collect())
    }

    async fn list_members(&self, group: &str) -> Result<Vec<MemberFact>> {
        Ok(self.group(group).await?.members)
    }

    async fn list_connections(&self, group: &str) -> Result<Vec<ConnectionFact>> {
        Ok(self.group(group).await?.connections)
    }

    async fn list_replicated_folders(&self, group: &str) -> Result<Vec<String>> {
        Ok(self.group(group).await?.folders)
    }

    async fn query_backlog(
        &self,
        group: &str,
        source: &str,
        destination: &str,
        folder: Option<&str>,
    ) -> Result<BacklogFact> {
        let inventory = self.group(group).await?;
        let record = inventory.backlogs.iter().find(|b| {
            b.source.eq_ignore_ascii_case(source)
                && b.destination.eq_ignore_ascii_case(destination)
                && match (folder, b.folder.as_deref()) {
                    (Some(want), Some(have)) => want.eq_ignore_ascii_case(have),
                    (None, _) => true,
                    (Some(_), None) => false,
                }
        });

        Ok(match record {
            Some(record) => BacklogFact::counted(record.count),
            None => BacklogFact::unknown("no backlog recorded in inventory"),
        })
    }
}

/// Resolve the UNC server and open a TCP connection to its SMB port
pub async fn probe_smb(unc_path: &str, port: u16) -> ProbeOutcome {
    let started = Instant::now();
    let (server, _share) = parse_unc(unc_path);
    if server.is_empty() {
        return ProbeOutcome::unreachable(None, "Invalid UNC path");
    }

    let elapsed_ms = |started: Instant| started.elapsed().as_millis() as u64;

    let mut addrs = match tokio::net::lookup_host((server.as_str(), port)).await {
        Ok(addrs) => addrs,
        Err(e) => {
            debug!(server = %server, error = %e, "DNS resolution failed");
            return ProbeOutcome::unreachable(
                Some(elapsed_ms(started)),
                format!("DNS lookup failed for {}: {}", server, e),
            );
        }
    };

    let Some(addr) = addrs.next() else {
        return ProbeOutcome::unreachable(
            Some(elapsed_ms(started)),
            format!("No addresses for {}", server),
        );
    };

    match TcpStream::connect(addr).await {
        Ok(_) => ProbeOutcome::reachable(elapsed_ms(started)),
        Err(e) => ProbeOutcome::unreachable(
            Some(elapsed_ms(started)),
            format!("SMB port {} not reachable on {}: {}", port, server, e),
        ),
    }
}

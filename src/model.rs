/*!
 * Snapshot data model
 *
 * A `Snapshot` is the immutable output of one collection run. All types
 * serialize as camelCase JSON and omit absent optional fields, which is the
 * format read by reporting consumers.
 */

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health of a target, namespace, member, connection, group or snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Health {
    #[default]
    Ok,
    Warn,
    Critical,
    Unknown,
}

impl Health {
    /// Worst-of aggregation: any `Critical` wins, then any `Warn`, else `Ok`
    ///
    /// `Unknown` children do not degrade the parent.
    pub fn aggregate<I>(children: I) -> Health
    where
        I: IntoIterator<Item = Health>,
    {
        let mut result = Health::Ok;
        for health in children {
            match health {
                Health::Critical => return Health::Critical,
                Health::Warn => result = Health::Warn,
                Health::Ok | Health::Unknown => {}
            }
        }
        result
    }

    /// Classify a count against warn/critical thresholds (inclusive)
    pub fn from_thresholds(count: u64, warn: u64, critical: u64) -> Health {
        if count >= critical {
            Health::Critical
        } else if count >= warn {
            Health::Warn
        } else {
            Health::Ok
        }
    }
}

impl std::fmt::Display for Health {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Health::Ok => "Ok",
            Health::Warn => "Warn",
            Health::Critical => "Critical",
            Health::Unknown => "Unknown",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub created_at: DateTime<Utc>,
    pub overall_health: Health,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,
    #[serde(default)]
    pub namespaces: Vec<NamespaceResult>,
    #[serde(default)]
    pub replication_groups: Vec<GroupResult>,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl Snapshot {
    /// Assemble a snapshot, deriving overall health and the error list
    pub fn assemble(
        created_at: DateTime<Utc>,
        trigger: Option<String>,
        namespaces: Vec<NamespaceResult>,
        replication_groups: Vec<GroupResult>,
        collector_errors: Vec<String>,
    ) -> Self {
        let overall_health = Health::aggregate(
            namespaces
                .iter()
                .map(|n| n.health)
                .chain(replication_groups.iter().map(|g| g.health)),
        );

        let mut errors = collector_errors;
        errors.extend(namespaces.iter().filter_map(|n| {
            n.error
                .as_ref()
                .map(|e| format!("namespace {}: {}", n.namespace_id, e))
        }));
        errors.extend(replication_groups.iter().filter_map(|g| {
            g.error
                .as_ref()
                .map(|e| format!("group {}: {}", g.group_name, e))
        }));

        Self {
            created_at,
            overall_health,
            trigger,
            namespaces,
            replication_groups,
            errors,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceResult {
    pub namespace_id: String,
    pub path: String,
    pub health: Health,
    pub last_checked_at: DateTime<Utc>,
    #[serde(default)]
    pub folders: Vec<FolderResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NamespaceResult {
    pub fn unreachable_targets(&self) -> usize {
        self.folders
            .iter()
            .flat_map(|f| f.targets.iter())
            .filter(|t| !t.reachable)
            .count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderResult {
    pub folder_path: String,
    #[serde(default)]
    pub targets: Vec<TargetResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetResult {
    pub unc_path: String,
    pub server: String,
    pub share: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_rank: Option<i64>,
    pub ordering_score: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_state: Option<String>,
    pub reachable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub last_checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupResult {
    pub group_name: String,
    pub health: Health,
    #[serde(default)]
    pub members: Vec<MemberResult>,
    #[serde(default)]
    pub connections: Vec<ConnectionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberResult {
    pub name: String,
    pub service_state: String,
    pub health: Health,
    #[serde(default)]
    pub recent_warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionResult {
    pub source: String,
    pub destination: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicated_folder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backlog_count: Option<u64>,
    pub backlog_state: Health,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/*!
 * Replication collector: member service state and backlog per connection
 *
 * When the provider reports no connections for a group, a linear chain over
 * consecutive members is assumed. Backlog is queried for every connection
 * and replicated folder pair. Both are heuristics; affected connection
 * results say so in `details`.
 */

use dfsmon_topology::{ConnectionFact, MemberFact, TopologyProvider};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::run_bounded;
use crate::config::{Config, Thresholds};
use crate::core::{with_retry, RetryPolicy};
use crate::error::{MonitorError, Result};
use crate::model::{ConnectionResult, GroupResult, Health, MemberResult};

const INFERRED_CONNECTION: &str = "approximate topology: connection inferred from member order";
const ASSUMED_FOLDER: &str = "approximate topology: folder assumed replicated on every connection";

/// Groups plus collector-level errors (e.g. discovery failure)
#[derive(Debug, Clone, Default)]
pub struct ReplicationReport {
    pub groups: Vec<GroupResult>,
    pub errors: Vec<String>,
}

pub struct ReplicationCollector {
    provider: Arc<dyn TopologyProvider>,
}

#[derive(Clone)]
struct GroupJob {
    provider: Arc<dyn TopologyProvider>,
    retry: RetryPolicy,
    thresholds: Thresholds,
    sample_warnings: bool,
    event_sample_count: usize,
    cancel: CancellationToken,
}

impl ReplicationCollector {
    pub fn new(provider: Arc<dyn TopologyProvider>) -> Self {
        Self { provider }
    }

    pub async fn collect(&self, config: &Config, cancel: &CancellationToken) -> Result<ReplicationReport> {
        let retry = RetryPolicy::from_config(config);
        let mut errors = Vec::new();

        let discovered = if config.replication.auto_discover_groups {
            let provider = self.provider.clone();
            match with_retry(&retry, cancel, "group discovery", || {
                let provider = provider.clone();
                async move { provider.discover_replication_groups().await }
            })
            .await
            {
                Ok(groups) => groups,
                Err(MonitorError::Cancelled) => return Err(MonitorError::Cancelled),
                Err(e) => {
                    warn!(error = %e, "replication group discovery failed");
                    errors.push(format!("replication: {}", e));
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let groups = merge_groups(discovered, &config.replication.explicit_groups);

        let job = GroupJob {
            provider: self.provider.clone(),
            retry,
            thresholds: config.collection.thresholds.clone(),
            sample_warnings: config.collectors.event_log,
            event_sample_count: config.collection.event_sample_count,
            cancel: cancel.clone(),
        };

        let slots = run_bounded(
            groups.clone(),
            config.collection.max_parallelism,
            cancel,
            |group| job.clone().run(group),
        )
        .await?;

        let mut results = Vec::with_capacity(slots.len());
        for (group, slot) in groups.into_iter().zip(slots) {
            match slot {
                Some(Ok(result)) => results.push(result),
                Some(Err(e)) if e.is_cancelled() => return Err(e),
                Some(Err(e)) => results.push(failed(&group, e.to_string())),
                None => results.push(failed(&group, "group collection aborted".to_string())),
            }
        }

        Ok(ReplicationReport {
            groups: results,
            errors,
        })
    }
}

impl GroupJob {
    async fn run(self, group: String) -> Result<GroupResult> {
        let facts = async {
            let members = self.query(&group, "members", |p, g| async move { p.list_members(&g).await }).await?;
            let connections = self
                .query(&group, "connections", |p, g| async move { p.list_connections(&g).await })
                .await?;
            let folders = self
                .query(&group, "folders", |p, g| async move { p.list_replicated_folders(&g).await })
                .await?;
            Ok::<_, MonitorError>((members, connections, folders))
        }
        .await;

        let (members, connections, folders) = match facts {
            Ok(facts) => facts,
            Err(MonitorError::Cancelled) => return Err(MonitorError::Cancelled),
            Err(e) => {
                warn!(group = %group, error = %e, "replication group query failed");
                return Ok(failed(&group, e.to_string()));
            }
        };

        let member_results: Vec<MemberResult> = members.iter().map(|m| self.member_result(m)).collect();

        let (connections, inferred) = effective_connections(connections, &members);
        let folders = dedupe_ci(folders);
        let folder_slots: Vec<Option<String>> = if folders.is_empty() {
            vec![None]
        } else {
            folders.into_iter().map(Some).collect()
        };
        // Folders are not tied to connections by the provider
        let assumed = folder_slots.iter().any(Option::is_some);

        let mut connection_results = Vec::with_capacity(connections.len() * folder_slots.len());
        for connection in &connections {
            for folder in &folder_slots {
                let mut result = self.backlog(&group, connection, folder.as_deref()).await?;
                let mut notes: Vec<&str> = Vec::new();
                if inferred {
                    notes.push(INFERRED_CONNECTION);
                }
                if assumed {
                    notes.push(ASSUMED_FOLDER);
                }
                if !notes.is_empty() {
                    let mut details: Vec<String> = notes.iter().map(|n| n.to_string()).collect();
                    details.extend(result.details.take());
                    result.details = Some(details.join("; "));
                }
                connection_results.push(result);
            }
        }

        let health = Health::aggregate(
            member_results
                .iter()
                .map(|m| m.health)
                .chain(connection_results.iter().map(|c| c.backlog_state)),
        );

        info!(
            group = %group,
            members = member_results.len(),
            connections = connection_results.len(),
            health = %health,
            "replication group collected"
        );

        Ok(GroupResult {
            group_name: group,
            health,
            members: member_results,
            connections: connection_results,
            error: None,
        })
    }

    async fn query<T, F, Fut>(&self, group: &str, what: &str, op: F) -> Result<T>
    where
        F: Fn(Arc<dyn TopologyProvider>, String) -> Fut,
        Fut: Future<Output = dfsmon_topology::Result<T>>,
    {
        let context = format!("{} of {}", what, group);
        with_retry(&self.retry, &self.cancel, &context, || {
            op(self.provider.clone(), group.to_string())
        })
        .await
    }

    fn member_result(&self, member: &MemberFact) -> MemberResult {
        let recent_warnings: Vec<String> = if self.sample_warnings {
            member
                .warnings
                .iter()
                .take(self.event_sample_count)
                .cloned()
                .collect()
        } else {
            Vec::new()
        };

        let health = if !member.service_state.trim().eq_ignore_ascii_case("running") {
            Health::Critical
        } else if !recent_warnings.is_empty() {
            Health::Warn
        } else {
            Health::Ok
        };

        MemberResult {
            name: member.name.clone(),
            service_state: member.service_state.clone(),
            health,
            recent_warnings,
        }
    }

    async fn backlog(
        &self,
        group: &str,
        connection: &ConnectionFact,
        folder: Option<&str>,
    ) -> Result<ConnectionResult> {
        let context = format!(
            "backlog {} -> {} in {}",
            connection.source, connection.destination, group
        );
        let fact = with_retry(&self.retry, &self.cancel, &context, || {
            let provider = self.provider.clone();
            let (group, connection) = (group.to_string(), connection.clone());
            let folder = folder.map(str::to_string);
            async move {
                provider
                    .query_backlog(
                        &group,
                        &connection.source,
                        &connection.destination,
                        folder.as_deref(),
                    )
                    .await
            }
        })
        .await;

        let (backlog_count, backlog_state, details) = match fact {
            Ok(fact) => match fact.count {
                Some(count) => (
                    Some(count),
                    Health::from_thresholds(
                        count,
                        self.thresholds.warn_backlog,
                        self.thresholds.critical_backlog,
                    ),
                    fact.details,
                ),
                None => (None, Health::Unknown, fact.details.or(Some(fact.state))),
            },
            Err(MonitorError::Cancelled) => return Err(MonitorError::Cancelled),
            Err(e) => (None, Health::Unknown, Some(e.to_string())),
        };

        Ok(ConnectionResult {
            source: connection.source.clone(),
            destination: connection.destination.clone(),
            replicated_folder: folder.map(str::to_string),
            backlog_count,
            backlog_state,
            details,
        })
    }
}

/// Discovered groups first, then explicit ones; case-insensitive, first spelling wins
fn merge_groups(discovered: Vec<String>, explicit: &[String]) -> Vec<String> {
    dedupe_ci(discovered.into_iter().chain(explicit.iter().cloned()).collect())
}

fn dedupe_ci(names: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .into_iter()
        .filter(|n| !n.trim().is_empty())
        .filter(|n| seen.insert(n.to_ascii_lowercase()))
        .collect()
}

/// Reported connections (deduplicated), or a chain across consecutive
/// members when none are reported. The flag is set for the chain.
fn effective_connections(
    reported: Vec<ConnectionFact>,
    members: &[MemberFact],
) -> (Vec<ConnectionFact>, bool) {
    let mut seen = HashSet::new();
    let unique: Vec<ConnectionFact> = reported
        .into_iter()
        .filter(|c| {
            seen.insert((
                c.source.to_ascii_lowercase(),
                c.destination.to_ascii_lowercase(),
            ))
        })
        .collect();

    if !unique.is_empty() {
        return (unique, false);
    }

    let chain = members
        .windows(2)
        .map(|pair| ConnectionFact {
            source: pair[0].name.clone(),
            destination: pair[1].name.clone(),
        })
        .collect();
    (chain, true)
}

fn failed(group: &str, error: String) -> GroupResult {
    GroupResult {
        group_name: group.to_string(),
        health: Health::Critical,
        members: Vec::new(),
        connections: Vec::new(),
        error: Some(error),
    }
}

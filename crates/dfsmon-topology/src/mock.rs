//! In-memory programmable topology for tests
//!
//! Facts, failures and delays are configured up front (or between runs
//! through a shared `Arc`). Every query is counted so tests can assert on
//! retry and isolation behavior, and probe concurrency is tracked so the
//! parallelism bound can be verified.

use crate::{
    BacklogFact, ConnectionFact, FolderTargetFact, MemberFact, ProbeOutcome, Result,
    TopologyError, TopologyProvider,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone, Default)]
struct GroupData {
    members: Vec<MemberFact>,
    connections: Vec<ConnectionFact>,
    folders: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
enum Failure {
    Always,
    Times(u32),
}

#[derive(Debug, Default)]
struct State {
    namespaces: HashMap<String, Vec<FolderTargetFact>>,
    namespace_failures: HashMap<String, Failure>,
    probes: HashMap<String, ProbeOutcome>,
    probe_delays: HashMap<String, Duration>,
    discovered: Vec<String>,
    discovery_fails: bool,
    groups: HashMap<String, GroupData>,
    group_failures: HashMap<String, Failure>,
    backlogs: HashMap<String, Option<u64>>,
    backlog_failures: HashMap<String, Failure>,
    query_delay: Option<Duration>,
}

/// Programmable `TopologyProvider`
#[derive(Debug, Default)]
pub struct MockTopology {
    state: Mutex<State>,
    namespace_calls: AtomicUsize,
    probe_calls: AtomicUsize,
    backlog_calls: AtomicUsize,
    in_flight_probes: AtomicUsize,
    peak_probes: AtomicUsize,
}

fn key(s: &str) -> String {
    s.to_ascii_lowercase()
}

fn backlog_key(group: &str, source: &str, destination: &str, folder: Option<&str>) -> String {
    format!(
        "{}|{}|{}|{}",
        key(group),
        key(source),
        key(destination),
        folder.map(key).unwrap_or_default()
    )
}

/// Consume one failure, returning whether this call should fail
fn take_failure(failures: &mut HashMap<String, Failure>, k: &str) -> bool {
    match failures.get_mut(k) {
        Some(Failure::Always) => true,
        Some(Failure::Times(n)) if *n > 0 => {
            *n -= 1;
            true
        }
        _ => false,
    }
}

impl MockTopology {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ─── Namespace setup ───────────────────────────────────────────────────

    /// Register a folder target under `namespace`
    pub fn add_target(
        &self,
        namespace: &str,
        folder_path: &str,
        target_unc_path: &str,
        priority_class: Option<&str>,
        priority_rank: Option<i64>,
        raw_state: Option<&str>,
    ) -> &Self {
        self.state()
            .namespaces
            .entry(key(namespace))
            .or_default()
            .push(FolderTargetFact {
                folder_path: folder_path.to_string(),
                target_unc_path: target_unc_path.to_string(),
                priority_class: priority_class.map(str::to_string),
                priority_rank,
                raw_state: raw_state.map(str::to_string),
            });
        self
    }

    /// Make `list_folder_targets` fail for `namespace`; `None` means forever
    pub fn fail_namespace(&self, namespace: &str, times: Option<u32>) -> &Self {
        let failure = times.map(Failure::Times).unwrap_or(Failure::Always);
        self.state()
            .namespace_failures
            .insert(key(namespace), failure);
        self
    }

    pub fn set_probe(&self, unc_path: &str, outcome: ProbeOutcome) -> &Self {
        self.state().probes.insert(key(unc_path), outcome);
        self
    }

    /// Delay the probe of one target (used to exercise probe timeouts)
    pub fn delay_probe(&self, unc_path: &str, delay: Duration) -> &Self {
        self.state().probe_delays.insert(key(unc_path), delay);
        self
    }

    /// Delay every fallible query (used to exercise request timeouts)
    pub fn delay_queries(&self, delay: Duration) -> &Self {
        self.state().query_delay = Some(delay);
        self
    }

    // ─── Replication setup ─────────────────────────────────────────────────

    /// Register a group; `discoverable` controls whether discovery reports it
    pub fn add_group(&self, group: &str, discoverable: bool) -> &Self {
        let mut state = self.state();
        state.groups.entry(key(group)).or_default();
        if discoverable {
            state.discovered.push(group.to_string());
        }
        drop(state);
        self
    }

    pub fn add_member(&self, group: &str, name: &str, service_state: &str, warnings: &[&str]) -> &Self {
        self.state()
            .groups
            .entry(key(group))
            .or_default()
            .members
            .push(MemberFact {
                name: name.to_string(),
                service_state: service_state.to_string(),
                warnings: warnings.iter().map(|w| w.to_string()).collect(),
            });
        self
    }

    pub fn add_connection(&self, group: &str, source: &str, destination: &str) -> &Self {
        self.state()
            .groups
            .entry(key(group))
            .or_default()
            .connections
            .push(ConnectionFact {
                source: source.to_string(),
                destination: destination.to_string(),
            });
        self
    }

    pub fn add_folder(&self, group: &str, folder: &str) -> &Self {
        self.state()
            .groups
            .entry(key(group))
            .or_default()
            .folders
            .push(folder.to_string());
        self
    }

    /// Set the backlog reported for a connection; `count = None` reports unknown
    pub fn set_backlog(
        &self,
        group: &str,
        source: &str,
        destination: &str,
        folder: Option<&str>,
        count: Option<u64>,
    ) -> &Self {
        self.state()
            .backlogs
            .insert(backlog_key(group, source, destination, folder), count);
        self
    }

    pub fn fail_backlog(
        &self,
        group: &str,
        source: &str,
        destination: &str,
        folder: Option<&str>,
        times: Option<u32>,
    ) -> &Self {
        let failure = times.map(Failure::Times).unwrap_or(Failure::Always);
        self.state()
            .backlog_failures
            .insert(backlog_key(group, source, destination, folder), failure);
        self
    }

    pub fn fail_discovery(&self) -> &Self {
        self.state().discovery_fails = true;
        self
    }

    /// Make every member/connection/folder query of `group` fail
    pub fn fail_group(&self, group: &str, times: Option<u32>) -> &Self {
        let failure = times.map(Failure::Times).unwrap_or(Failure::Always);
        self.state().group_failures.insert(key(group), failure);
        self
    }

    // ─── Observations ──────────────────────────────────────────────────────

    pub fn namespace_calls(&self) -> usize {
        self.namespace_calls.load(Ordering::SeqCst)
    }

    pub fn probe_calls(&self) -> usize {
        self.probe_calls.load(Ordering::SeqCst)
    }

    pub fn backlog_calls(&self) -> usize {
        self.backlog_calls.load(Ordering::SeqCst)
    }

    /// Highest number of probes observed running at once
    pub fn peak_concurrent_probes(&self) -> usize {
        self.peak_probes.load(Ordering::SeqCst)
    }

    async fn query_pause(&self) {
        let delay = self.state().query_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    async fn group_data(&self, group: &str) -> Result<GroupData> {
        self.query_pause().await;
        let mut state = self.state();
        let k = key(group);
        if take_failure(&mut state.group_failures, &k) {
            return Err(TopologyError::CommandFailed(format!(
                "simulated failure for group {}",
                group
            )));
        }
        state
            .groups
            .get(&k)
            .cloned()
            .ok_or_else(|| TopologyError::NotFound(format!("replication group {}", group)))
    }
}

#[async_trait]
impl TopologyProvider for MockTopology {
    async fn list_folder_targets(&self, namespace_path: &str) -> Result<Vec<FolderTargetFact>> {
        self.namespace_calls.fetch_add(1, Ordering::SeqCst);
        self.query_pause().await;

        let mut state = self.state();
        let k = key(namespace_path);
        if take_failure(&mut state.namespace_failures, &k) {
            return Err(TopologyError::CommandFailed(format!(
                "simulated failure for namespace {}",
                namespace_path
            )));
        }
        state
            .namespaces
            .get(&k)
            .cloned()
            .ok_or_else(|| TopologyError::NotFound(format!("namespace {}", namespace_path)))
    }

    async fn probe_target(&self, unc_path: &str) -> ProbeOutcome {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight_probes.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_probes.fetch_max(now, Ordering::SeqCst);

        let (outcome, delay) = {
            let state = self.state();
            let k = key(unc_path);
            (
                state
                    .probes
                    .get(&k)
                    .cloned()
                    .unwrap_or_else(|| ProbeOutcome::reachable(1)),
                state.probe_delays.get(&k).copied(),
            )
        };

        // Yield so concurrent probes overlap even without an explicit delay
        tokio::time::sleep(delay.unwrap_or(Duration::from_millis(5))).await;

        self.in_flight_probes.fetch_sub(1, Ordering::SeqCst);
        outcome
    }

    async fn discover_replication_groups(&self) -> Result<Vec<String>> {
        self.query_pause().await;
        let state = self.state();
        if state.discovery_fails {
            return Err(TopologyError::CommandFailed(
                "simulated discovery failure".to_string(),
            ));
        }
        Ok(state.discovered.clone())
    }

    async fn list_members(&self, group: &str) -> Result<Vec<MemberFact>> {
        Ok(self.group_data(group).await?.members)
    }

    async fn list_connections(&self, group: &str) -> Result<Vec<ConnectionFact>> {
        Ok(self.group_data(group).await?.connections)
    }

    async fn list_replicated_folders(&self, group: &str) -> Result<Vec<String>> {
        Ok(self.group_data(group).await?.folders)
    }

    async fn query_backlog(
        &self,
        group: &str,
        source: &str,
        destination: &str,
        folder: Option<&str>,
    ) -> Result<BacklogFact> {
        self.backlog_calls.fetch_add(1, Ordering::SeqCst);
        self.query_pause().await;

        let mut state = self.state();
        let k = backlog_key(group, source, destination, folder);
        if take_failure(&mut state.backlog_failures, &k) {
            return Err(TopologyError::CommandFailed(format!(
                "simulated backlog failure {} -> {}",
                source, destination
            )));
        }
        Ok(match state.backlogs.get(&k) {
            Some(Some(count)) => BacklogFact::counted(*count),
            Some(None) | None => BacklogFact::unknown("backlog not available"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_failure_budget_is_consumed() {
        let mock = MockTopology::new();
        mock.add_target(r"\\corp\ns", r"\\corp\ns\a", r"\\fs01\a", None, None, None)
            .fail_namespace(r"\\corp\ns", Some(1));

        assert!(mock.list_folder_targets(r"\\corp\ns").await.is_err());
        let targets = mock.list_folder_targets(r"\\CORP\ns").await.unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(mock.namespace_calls(), 2);
    }

    #[tokio::test]
    async fn test_probe_defaults_to_reachable() {
        let mock = MockTopology::new();
        mock.set_probe(r"\\fs02\b", ProbeOutcome::unreachable(Some(3), "refused"));

        assert!(mock.probe_target(r"\\fs01\a").await.reachable);
        assert!(!mock.probe_target(r"\\fs02\b").await.reachable);
        assert_eq!(mock.peak_concurrent_probes(), 1);
    }

    #[tokio::test]
    async fn test_only_discoverable_groups_are_discovered() {
        let mock = MockTopology::new();
        mock.add_group("visible", true).add_group("hidden", false);

        let groups = mock.discover_replication_groups().await.unwrap();
        assert_eq!(groups, vec!["visible".to_string()]);
        assert!(mock.list_members("hidden").await.unwrap().is_empty());
    }
}

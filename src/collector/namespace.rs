/*!
 * Namespace collector: folder target reachability and referral ordering
 */

use chrono::Utc;
use dfsmon_topology::{parse_unc, FolderTargetFact, ProbeOutcome, TopologyProvider};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::run_bounded;
use super::scoring::{class_weight, is_enabled_state, namespace_health, ordering_score};
use crate::config::{Config, NamespaceDefinition, Thresholds};
use crate::core::{with_retry, RetryPolicy};
use crate::error::{MonitorError, Result};
use crate::model::{FolderResult, Health, NamespaceResult, TargetResult};

pub struct NamespaceCollector {
    provider: Arc<dyn TopologyProvider>,
}

/// Per-run settings copied into every namespace task
#[derive(Clone)]
struct NamespaceJob {
    provider: Arc<dyn TopologyProvider>,
    retry: RetryPolicy,
    probe_timeout: Duration,
    thresholds: Thresholds,
    cancel: CancellationToken,
}

impl NamespaceCollector {
    pub fn new(provider: Arc<dyn TopologyProvider>) -> Self {
        Self { provider }
    }

    /// Collect every enabled namespace, in configuration order
    pub async fn collect(
        &self,
        config: &Config,
        cancel: &CancellationToken,
    ) -> Result<Vec<NamespaceResult>> {
        let namespaces: Vec<NamespaceDefinition> = config
            .namespaces
            .iter()
            .filter(|ns| ns.enabled)
            .cloned()
            .collect();

        let job = NamespaceJob {
            provider: self.provider.clone(),
            retry: RetryPolicy::from_config(config),
            probe_timeout: config.probe_timeout(),
            thresholds: config.collection.thresholds.clone(),
            cancel: cancel.clone(),
        };

        let slots = run_bounded(
            namespaces.clone(),
            config.collection.max_parallelism,
            cancel,
            |ns| job.clone().run(ns),
        )
        .await?;

        let mut results = Vec::with_capacity(slots.len());
        for (ns, slot) in namespaces.into_iter().zip(slots) {
            match slot {
                Some(Ok(result)) => results.push(result),
                Some(Err(e)) if e.is_cancelled() => return Err(e),
                Some(Err(e)) => results.push(failed(&ns, e.to_string())),
                None => results.push(failed(&ns, "namespace collection aborted".to_string())),
            }
        }
        Ok(results)
    }
}

impl NamespaceJob {
    async fn run(self, ns: NamespaceDefinition) -> Result<NamespaceResult> {
        let provider = self.provider.clone();
        let path = ns.path.clone();
        let facts = match with_retry(&self.retry, &self.cancel, &ns.path, || {
            let provider = provider.clone();
            let path = path.clone();
            async move { provider.list_folder_targets(&path).await }
        })
        .await
        {
            Ok(facts) => facts,
            Err(MonitorError::Cancelled) => return Err(MonitorError::Cancelled),
            Err(e) => {
                warn!(namespace = %ns.id, error = %e, "namespace query failed");
                return Ok(failed(&ns, e.to_string()));
            }
        };

        let mut folders: Vec<FolderResult> = Vec::new();
        let mut folder_index: HashMap<String, usize> = HashMap::new();

        for fact in facts {
            if self.cancel.is_cancelled() {
                return Err(MonitorError::Cancelled);
            }
            let target = self.probe_fact(&fact).await?;
            let index = *folder_index
                .entry(fact.folder_path.to_ascii_lowercase())
                .or_insert_with(|| {
                    folders.push(FolderResult {
                        folder_path: fact.folder_path.clone(),
                        targets: Vec::new(),
                    });
                    folders.len() - 1
                });
            folders[index].targets.push(target);
        }

        let mut result = NamespaceResult {
            namespace_id: ns.id.clone(),
            path: ns.path.clone(),
            health: Health::Ok,
            last_checked_at: Utc::now(),
            folders,
            error: None,
        };
        let unreachable = result.unreachable_targets();
        result.health = namespace_health(unreachable, &self.thresholds);

        info!(
            namespace = %ns.id,
            folders = result.folders.len(),
            unreachable,
            health = %result.health,
            "namespace collected"
        );
        Ok(result)
    }

    async fn probe_fact(&self, fact: &FolderTargetFact) -> Result<TargetResult> {
        let outcome = self.probe(&fact.target_unc_path).await?;
        let (server, share) = parse_unc(&fact.target_unc_path);
        let enabled = is_enabled_state(fact.raw_state.as_deref());
        let score = ordering_score(
            enabled,
            class_weight(fact.priority_class.as_deref()),
            fact.priority_rank.unwrap_or(0),
        );

        Ok(TargetResult {
            unc_path: fact.target_unc_path.clone(),
            server,
            share,
            priority_class: fact.priority_class.clone(),
            priority_rank: fact.priority_rank,
            ordering_score: score,
            raw_state: fact.raw_state.clone(),
            reachable: outcome.reachable,
            latency_ms: outcome.latency_ms,
            last_error: outcome.error,
            last_checked_at: Utc::now(),
        })
    }

    /// Probe one target; elapsed time is recorded even on failure
    async fn probe(&self, unc_path: &str) -> Result<ProbeOutcome> {
        let started = Instant::now();
        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(MonitorError::Cancelled),
            res = tokio::time::timeout(self.probe_timeout, self.provider.probe_target(unc_path)) => res,
        };
        let elapsed = started.elapsed().as_millis() as u64;

        Ok(match outcome {
            Ok(mut outcome) => {
                outcome.latency_ms.get_or_insert(elapsed);
                outcome
            }
            Err(_) => {
                debug!(unc = unc_path, "probe timed out");
                ProbeOutcome::unreachable(
                    Some(elapsed),
                    format!("Probe timed out after {:?}", self.probe_timeout),
                )
            }
        })
    }
}

fn failed(ns: &NamespaceDefinition, error: String) -> NamespaceResult {
    NamespaceResult {
        namespace_id: ns.id.clone(),
        path: ns.path.clone(),
        health: Health::Critical,
        last_checked_at: Utc::now(),
        folders: Vec::new(),
        error: Some(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dfsmon_topology::MockTopology;

    const NS: &str = r"\\corp\files";

    fn config_for(paths: &[(&str, &str)]) -> Config {
        let mut config = Config::default();
        config.namespaces = paths
            .iter()
            .map(|(id, path)| NamespaceDefinition::new(*id, *path))
            .collect();
        config.collection.retry_count = 0;
        config
    }

    #[tokio::test]
    async fn test_targets_grouped_by_folder_and_scored() {
        let mock = Arc::new(MockTopology::new());
        mock.add_target(NS, r"\\corp\files\eng", r"\\fs01\eng", Some("GlobalHigh"), Some(0), Some("Online"))
            .add_target(NS, r"\\corp\files\eng", r"\\fs02\eng", Some("GlobalHigh"), Some(10), Some("Online"))
            .add_target(NS, r"\\corp\files\hr", r"\\fs03\hr", Some("GlobalHigh"), Some(0), Some("Offline"));

        let collector = NamespaceCollector::new(mock.clone());
        let results = collector
            .collect(&config_for(&[("files", NS)]), &CancellationToken::new())
            .await
            .unwrap();

        let ns = &results[0];
        assert_eq!(ns.health, Health::Ok);
        assert_eq!(ns.folders.len(), 2);
        let eng = &ns.folders[0].targets;
        assert_eq!(eng[0].ordering_score, 105_000);
        assert_eq!(eng[1].ordering_score, 104_990);
        assert_eq!(eng[0].server, "fs01");
        assert_eq!(eng[0].share, "eng");
        assert_eq!(ns.folders[1].targets[0].ordering_score, 5_000);
    }

    #[tokio::test]
    async fn test_unreachable_targets_drive_health() {
        let mock = Arc::new(MockTopology::new());
        for i in 0..3 {
            let unc = format!(r"\\fs0{}\data", i);
            mock.add_target(NS, r"\\corp\files\data", &unc, None, None, None)
                .set_probe(&unc, ProbeOutcome::unreachable(Some(4), "connection refused"));
        }

        let results = NamespaceCollector::new(mock)
            .collect(&config_for(&[("files", NS)]), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(results[0].health, Health::Critical);
        let target = &results[0].folders[0].targets[0];
        assert!(!target.reachable);
        assert_eq!(target.latency_ms, Some(4));
        assert_eq!(target.last_error.as_deref(), Some("connection refused"));
    }

    #[tokio::test]
    async fn test_disabled_namespaces_are_skipped() {
        let mock = Arc::new(MockTopology::new());
        mock.add_target(NS, r"\\corp\files\a", r"\\fs01\a", None, None, None);

        let mut config = config_for(&[("files", NS), ("other", r"\\corp\other")]);
        config.namespaces[1].enabled = false;

        let results = NamespaceCollector::new(mock.clone())
            .collect(&config, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(mock.namespace_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_probe_times_out_with_latency() {
        let mock = Arc::new(MockTopology::new());
        mock.add_target(NS, r"\\corp\files\a", r"\\slow\a", None, None, None)
            .delay_probe(r"\\slow\a", Duration::from_secs(120));

        let mut config = config_for(&[("files", NS)]);
        config.collection.request_timeout_seconds = 3;

        let results = NamespaceCollector::new(mock)
            .collect(&config, &CancellationToken::new())
            .await
            .unwrap();

        let target = &results[0].folders[0].targets[0];
        assert!(!target.reachable);
        assert!(target.latency_ms.unwrap() >= 3000);
        assert!(target.last_error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_recovers_within_retry_budget() {
        let mock = Arc::new(MockTopology::new());
        mock.add_target(NS, r"\\corp\files\a", r"\\fs01\a", None, None, None)
            .fail_namespace(NS, Some(2));

        let mut config = config_for(&[("files", NS)]);
        config.collection.retry_count = 2;

        let results = NamespaceCollector::new(mock.clone())
            .collect(&config, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(results[0].health, Health::Ok);
        assert!(results[0].error.is_none());
        assert_eq!(mock.namespace_calls(), 3);
        assert_eq!(mock.probe_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_mark_namespace_critical() {
        let mock = Arc::new(MockTopology::new());
        mock.add_target(NS, r"\\corp\files\a", r"\\fs01\a", None, None, None)
            .fail_namespace(NS, Some(3));

        let mut config = config_for(&[("files", NS)]);
        config.collection.retry_count = 2;

        let results = NamespaceCollector::new(mock.clone())
            .collect(&config, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(results[0].health, Health::Critical);
        assert!(results[0].error.as_deref().unwrap().contains("simulated failure"));
        assert!(results[0].folders.is_empty());
        assert_eq!(mock.namespace_calls(), 3);
        assert_eq!(mock.probe_calls(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_probes_bounded_by_parallelism() {
        let mock = Arc::new(MockTopology::new());
        let mut namespaces = Vec::new();
        for i in 0..12 {
            let path = format!(r"\\corp\ns{}", i);
            for t in 0..2 {
                let unc = format!(r"\\fs{}{}\share", i, t);
                mock.add_target(&path, &format!(r"{}\data", path), &unc, None, None, None)
                    .delay_probe(&unc, Duration::from_millis(15));
            }
            namespaces.push((format!("ns{}", i), path));
        }
        let refs: Vec<(&str, &str)> = namespaces
            .iter()
            .map(|(id, path)| (id.as_str(), path.as_str()))
            .collect();

        let mut config = config_for(&refs);
        config.collection.max_parallelism = 3;

        let results = NamespaceCollector::new(mock.clone())
            .collect(&config, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(results.len(), 12);
        assert_eq!(mock.probe_calls(), 24);
        let peak = mock.peak_concurrent_probes();
        assert!((1..=3).contains(&peak), "peak concurrent probes: {}", peak);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_target_listing_hits_request_timeout() {
        let mock = Arc::new(MockTopology::new());
        mock.add_target(NS, r"\\corp\files\a", r"\\fs01\a", None, None, None)
            .delay_queries(Duration::from_secs(120));

        let mut config = config_for(&[("files", NS)]);
        config.collection.request_timeout_seconds = 5;

        let results = NamespaceCollector::new(mock.clone())
            .collect(&config, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(results[0].health, Health::Critical);
        assert!(results[0].error.as_deref().unwrap().contains("timed out"));
        assert_eq!(mock.probe_calls(), 0);
    }
}

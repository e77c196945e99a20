use dfsmon::config::{Config, NamespaceDefinition};
use dfsmon::error::{MonitorError, SaveOutcome};
use dfsmon::store::{ConfigStore, LockSettings};
use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn store_in(dir: &Path) -> ConfigStore {
    ConfigStore::new(dir.join("share").join("config.json"), dir.join("local"))
}

fn remote_version(store: &ConfigStore) -> u64 {
    let raw = fs::read_to_string(store.remote_path()).unwrap();
    Config::from_json(&raw).unwrap().version
}

#[tokio::test]
async fn test_first_load_creates_and_persists_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let store = store_in(temp_dir.path());

    let first = store.load().await.unwrap();
    assert!(store.remote_path().exists(), "defaults should reach the shared copy");
    assert!(store.local_cache_path().exists(), "defaults should reach the local cache");
    assert_eq!(first.collection.polling_interval_seconds, 300);

    let second = store.load().await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_save_then_load_increases_version() {
    let temp_dir = TempDir::new().unwrap();
    let store = store_in(temp_dir.path());

    let mut config = store.load().await.unwrap();
    let before = config.version;
    config
        .namespaces
        .push(NamespaceDefinition::new("eng", r"\\corp\eng"));

    let outcome = store.save(&config).await.unwrap();
    assert!(outcome.is_committed());

    let reloaded = store.load().await.unwrap();
    assert!(reloaded.version > before);
    assert_eq!(reloaded.namespaces.len(), 1);
    assert!(reloaded.updated_at.is_some());
}

#[tokio::test]
async fn test_stale_save_is_rejected_without_touching_remote() {
    let temp_dir = TempDir::new().unwrap();
    let store = store_in(temp_dir.path());

    let stale = store.load().await.unwrap();
    let fresh = store.save(&stale).await.unwrap().into_result().unwrap();
    store.save(&fresh).await.unwrap();

    let remote_before = fs::read(store.remote_path()).unwrap();

    let outcome = store.save(&stale).await.unwrap();
    match outcome {
        SaveOutcome::Conflict {
            attempted,
            persisted,
        } => {
            assert_eq!(attempted, stale.version);
            assert_eq!(persisted, fresh.version + 1);
        }
        other => panic!("expected conflict, got {:?}", other),
    }

    assert_eq!(fs::read(store.remote_path()).unwrap(), remote_before);
}

#[tokio::test]
async fn test_previous_remote_copy_is_archived() {
    let temp_dir = TempDir::new().unwrap();
    let store = store_in(temp_dir.path());

    let config = store.load().await.unwrap();
    store.save(&config).await.unwrap();

    let backups: Vec<_> = fs::read_dir(temp_dir.path().join("share"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("config_") && name.ends_with(".json"))
        .collect();
    assert!(!backups.is_empty(), "expected a timestamped backup");
}

#[tokio::test]
async fn test_unreachable_remote_keeps_local_cache_authoritative() {
    let temp_dir = TempDir::new().unwrap();
    // A plain file where the share directory should be
    fs::write(temp_dir.path().join("share"), b"not a directory").unwrap();
    let store = store_in(temp_dir.path());

    let config = Config::default();
    let outcome = store.save(&config).await.unwrap();
    let saved = match outcome {
        SaveOutcome::Unreachable { config, .. } => config,
        other => panic!("expected unreachable, got {:?}", other),
    };
    assert_eq!(saved.version, config.version + 1);

    let loaded = store.load().await.unwrap();
    assert_eq!(loaded.version, saved.version);
}

#[tokio::test]
async fn test_lock_timeout_is_reported_and_cache_updated() {
    let temp_dir = TempDir::new().unwrap();
    let store = store_in(temp_dir.path()).with_lock_settings(LockSettings {
        wait: Duration::from_millis(200),
        poll: Duration::from_millis(25),
        stale_after: Duration::from_secs(3600),
    });

    let config = store.load().await.unwrap();
    fs::write(store.lock_path(), b"pid=1").unwrap();

    let outcome = store.save(&config).await.unwrap();
    assert!(matches!(outcome, SaveOutcome::Timeout { .. }));
    assert!(outcome.into_result().is_err());

    assert_eq!(remote_version(&store), config.version);
    let cached = Config::from_json(&fs::read_to_string(store.local_cache_path()).unwrap()).unwrap();
    assert_eq!(cached.version, config.version + 1);
    assert!(store.lock_path().exists(), "foreign lock must not be removed");
}

#[tokio::test]
async fn test_corrupt_remote_falls_back_to_cache() {
    let temp_dir = TempDir::new().unwrap();
    let store = store_in(temp_dir.path());

    let config = store.load().await.unwrap();
    fs::write(store.remote_path(), b"{ truncated").unwrap();

    let loaded = store.load().await.unwrap();
    assert_eq!(loaded.version, config.version);

    // The next save replaces the corrupt copy
    let outcome = store.save(&loaded).await.unwrap();
    assert!(outcome.is_committed());
    assert_eq!(remote_version(&store), loaded.version + 1);
}

/// Leave a lock behind as if its writer crashed two minutes ago
fn abandon_lock(store: &ConfigStore) {
    let lock = store.lock_path();
    fs::write(&lock, b"pid=1").unwrap();
    fs::File::options()
        .write(true)
        .open(&lock)
        .unwrap()
        .set_modified(SystemTime::now() - Duration::from_secs(120))
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_writers_reclaim_abandoned_lock_once() {
    let settings = LockSettings {
        wait: Duration::from_secs(5),
        poll: Duration::from_millis(10),
        stale_after: Duration::from_secs(30),
    };

    for _ in 0..50 {
        let temp_dir = TempDir::new().unwrap();
        let remote = temp_dir.path().join("share").join("config.json");
        let first = ConfigStore::new(&remote, temp_dir.path().join("local-a"))
            .with_lock_settings(settings);
        let second = ConfigStore::new(&remote, temp_dir.path().join("local-b"))
            .with_lock_settings(settings);

        let base = first.load().await.unwrap();
        abandon_lock(&first);

        let (a, b) = {
            let (first, second) = (first.clone(), second.clone());
            let (base_a, base_b) = (base.clone(), base.clone());
            let a = tokio::spawn(async move { first.save(&base_a).await });
            let b = tokio::spawn(async move { second.save(&base_b).await });
            (a.await.unwrap().unwrap(), b.await.unwrap().unwrap())
        };

        let committed = [&a, &b].iter().filter(|o| o.is_committed()).count();
        let conflicts = [&a, &b]
            .iter()
            .filter(|o| matches!(o, SaveOutcome::Conflict { .. }))
            .count();
        assert_eq!((committed, conflicts), (1, 1), "outcomes: {:?} / {:?}", a, b);
        assert_eq!(remote_version(&first), base.version + 1);
        assert!(!first.lock_path().exists());
    }
}

#[tokio::test]
async fn test_lock_wait_stops_on_cancellation() {
    let temp_dir = TempDir::new().unwrap();
    let store = store_in(temp_dir.path()).with_lock_settings(LockSettings {
        wait: Duration::from_secs(60),
        poll: Duration::from_millis(20),
        stale_after: Duration::from_secs(3600),
    });

    let config = store.load().await.unwrap();
    fs::write(store.lock_path(), b"pid=1").unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        store.save_with_cancel(&config, &cancel),
    )
    .await
    .expect("cancellation ends the lock wait");

    assert!(matches!(result, Err(MonitorError::Cancelled)));
    assert_eq!(remote_version(&store), config.version);
    let cached = Config::from_json(&fs::read_to_string(store.local_cache_path()).unwrap()).unwrap();
    assert_eq!(cached.version, config.version + 1);
    assert!(store.lock_path().exists());
}

/*!
 * Versioned configuration store
 *
 * The document lives at a primary (usually shared) path and is mirrored in
 * a durable local cache. Saves write the cache first, then update the
 * primary copy under an exclusive lock file with optimistic concurrency:
 * a caller holding an older version than the one committed remotely is
 * rejected rather than silently overwriting newer settings.
 */

use chrono::Utc;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{Config, StorageSettings};
use crate::core::write_json_atomic;
use crate::error::{MonitorError, Result, SaveOutcome};
use crate::store::read_json;

/// File name of the local cache copy
pub const LOCAL_CACHE_FILE: &str = "config.cache.json";

/// Lock acquisition tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockSettings {
    /// Give up after waiting this long
    pub wait: Duration,
    pub poll: Duration,
    /// A lock file older than this is assumed abandoned by a crashed writer
    pub stale_after: Duration,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            wait: Duration::from_secs(5),
            poll: Duration::from_millis(150),
            stale_after: Duration::from_secs(30),
        }
    }
}

/// Removes the lock file when dropped
struct LockGuard {
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to release config lock");
        }
    }
}

enum LockError {
    Timeout(Duration),
    Cancelled,
    Io(io::Error),
}

/// Create `path` exclusively, stamped with the owning process
async fn create_exclusive(path: &Path) -> io::Result<LockGuard> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    let owner = format!("pid={} at={}\n", std::process::id(), Utc::now().to_rfc3339());
    // Owner info is diagnostic only
    let _ = file.write_all(owner.as_bytes()).await;
    Ok(LockGuard {
        path: path.to_path_buf(),
    })
}

#[derive(Debug, Clone)]
pub struct ConfigStore {
    remote_path: PathBuf,
    local_root: PathBuf,
    lock: LockSettings,
}

impl ConfigStore {
    pub fn new(remote_path: impl Into<PathBuf>, local_root: impl Into<PathBuf>) -> Self {
        Self {
            remote_path: remote_path.into(),
            local_root: local_root.into(),
            lock: LockSettings::default(),
        }
    }

    pub fn with_lock_settings(mut self, lock: LockSettings) -> Self {
        self.lock = lock;
        self
    }

    pub fn remote_path(&self) -> &Path {
        &self.remote_path
    }

    pub fn local_cache_path(&self) -> PathBuf {
        self.local_root.join(LOCAL_CACHE_FILE)
    }

    pub fn lock_path(&self) -> PathBuf {
        let mut name = self
            .remote_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "config.json".into());
        name.push(".lock");
        self.remote_path.with_file_name(name)
    }

    /// Load the current document
    ///
    /// Prefers the primary copy, then the local cache. When neither exists
    /// (or both are unreadable) a default document is saved and returned.
    pub async fn load(&self) -> Result<Config> {
        if let Some(config) = self.load_existing().await {
            return Ok(config);
        }

        info!(path = %self.remote_path.display(), "no configuration found, creating defaults");
        let defaults = Config::with_storage(StorageSettings::for_locations(
            &self.remote_path,
            &self.local_root,
        ));

        match self.save(&defaults).await? {
            SaveOutcome::Committed(config) | SaveOutcome::Unreachable { config, .. } => Ok(config),
            // Another writer got there first, or the lock was busy; both
            // leave a readable copy behind
            _ => Ok(self.load_existing().await.unwrap_or(defaults)),
        }
    }

    async fn load_existing(&self) -> Option<Config> {
        for path in [self.remote_path.clone(), self.local_cache_path()] {
            match read_json::<Config>(&path).await {
                Ok(Some(config)) => {
                    debug!(path = %path.display(), version = config.version, "loaded configuration");
                    return Some(config);
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "configuration copy unreadable, falling back"),
            }
        }
        None
    }

    /// Save a document, bumping its version
    ///
    /// Invalid documents and local cache failures are errors. Everything
    /// that can go wrong on the primary side is reported through the
    /// returned `SaveOutcome`.
    pub async fn save(&self, config: &Config) -> Result<SaveOutcome> {
        self.save_with_cancel(config, &CancellationToken::new()).await
    }

    /// `save`, giving up on lock acquisition once `cancel` fires
    ///
    /// A cancelled save has already updated the local cache.
    pub async fn save_with_cancel(
        &self,
        config: &Config,
        cancel: &CancellationToken,
    ) -> Result<SaveOutcome> {
        config.validate()?;

        let mut doc = config.clone();
        doc.version = config.version + 1;
        doc.updated_at = Some(Utc::now());

        let cache = self.local_cache_path();
        write_json_atomic(&cache, &doc)
            .await
            .map_err(|e| MonitorError::io(&cache, e))?;

        match self.save_remote(config.version, &doc, cancel).await {
            Ok(outcome) => Ok(outcome),
            Err(MonitorError::Cancelled) => Err(MonitorError::Cancelled),
            Err(e) => {
                warn!(
                    path = %self.remote_path.display(),
                    version = doc.version,
                    error = %e,
                    "primary configuration unreachable, keeping local cache"
                );
                Ok(SaveOutcome::Unreachable {
                    config: doc,
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn save_remote(
        &self,
        attempted: u64,
        doc: &Config,
        cancel: &CancellationToken,
    ) -> Result<SaveOutcome> {
        if let Some(parent) = self.remote_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| MonitorError::io(parent, e))?;
        }

        let _guard = match self.acquire_lock(cancel).await {
            Ok(guard) => guard,
            Err(LockError::Timeout(waited)) => {
                warn!(lock = %self.lock_path().display(), ?waited, "config lock busy");
                return Ok(SaveOutcome::Timeout {
                    path: self.lock_path(),
                    waited,
                });
            }
            Err(LockError::Cancelled) => return Err(MonitorError::Cancelled),
            Err(LockError::Io(e)) => return Err(MonitorError::io(self.lock_path(), e)),
        };

        let exists = match read_json::<Config>(&self.remote_path).await {
            Ok(Some(current)) if current.version > attempted => {
                warn!(attempted, persisted = current.version, "rejecting stale configuration save");
                return Ok(SaveOutcome::Conflict {
                    attempted,
                    persisted: current.version,
                });
            }
            Ok(Some(_)) => true,
            Ok(None) => false,
            Err(e @ MonitorError::Io { .. }) => return Err(e),
            Err(e) => {
                warn!(error = %e, "primary configuration corrupt, archiving and replacing");
                true
            }
        };

        if exists {
            let backup = self.backup_path();
            fs::copy(&self.remote_path, &backup)
                .await
                .map_err(|e| MonitorError::io(&backup, e))?;
            debug!(backup = %backup.display(), "archived previous configuration");
        }

        write_json_atomic(&self.remote_path, doc)
            .await
            .map_err(|e| MonitorError::io(&self.remote_path, e))?;
        info!(version = doc.version, path = %self.remote_path.display(), "configuration committed");
        Ok(SaveOutcome::Committed(doc.clone()))
    }

    /// `config_<yyyyMMddHHmmss>.json` next to the primary copy
    fn backup_path(&self) -> PathBuf {
        let stem = self
            .remote_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "config".to_string());
        let stamp = Utc::now().format("%Y%m%d%H%M%S");
        self.remote_path
            .with_file_name(format!("{}_{}.json", stem, stamp))
    }

    async fn acquire_lock(&self, cancel: &CancellationToken) -> std::result::Result<LockGuard, LockError> {
        let path = self.lock_path();
        let started = Instant::now();

        loop {
            match create_exclusive(&path).await {
                Ok(guard) => return Ok(guard),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    if self.is_stale(&path).await {
                        match self.reclaim_stale(&path).await {
                            Ok(true) => continue,
                            Ok(false) => {}
                            Err(e) => return Err(LockError::Io(e)),
                        }
                    }
                    let waited = started.elapsed();
                    if waited >= self.lock.wait {
                        return Err(LockError::Timeout(waited));
                    }
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(LockError::Cancelled),
                        _ = tokio::time::sleep(self.lock.poll) => {}
                    }
                }
                Err(e) => return Err(LockError::Io(e)),
            }
        }
    }

    /// Delete an abandoned lock, returning whether it was removed
    ///
    /// Only the holder of the reclaim marker may delete, and it re-checks
    /// staleness first: a writer that saw the same abandoned lock must not
    /// remove the fresh lock another writer created after reclaiming it.
    async fn reclaim_stale(&self, lock: &Path) -> io::Result<bool> {
        let mut name = lock.as_os_str().to_os_string();
        name.push(".reclaim");
        let marker = PathBuf::from(name);

        let _marker = match create_exclusive(&marker).await {
            Ok(guard) => guard,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                // A reclaimer that crashed mid-way leaves its marker behind
                if self.is_stale(&marker).await {
                    match fs::remove_file(&marker).await {
                        Ok(()) => {}
                        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                        Err(e) => return Err(e),
                    }
                }
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        if !self.is_stale(lock).await {
            return Ok(false);
        }
        warn!(lock = %lock.display(), "reclaiming stale config lock");
        match fs::remove_file(lock).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(true),
            Err(e) => Err(e),
        }
    }

    async fn is_stale(&self, path: &Path) -> bool {
        let Ok(meta) = fs::metadata(path).await else {
            return false;
        };
        meta.modified()
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .is_some_and(|age| age > self.lock.stale_after)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_lock_path_sits_next_to_config() {
        let store = ConfigStore::new("/mnt/share/config.json", "/var/cache/dfsmon");
        assert_eq!(store.lock_path(), PathBuf::from("/mnt/share/config.json.lock"));
        assert_eq!(
            store.local_cache_path(),
            PathBuf::from("/var/cache/dfsmon/config.cache.json")
        );
    }

    #[tokio::test]
    async fn test_backup_name_format() {
        let store = ConfigStore::new("/mnt/share/config.json", "/tmp/cache");
        let name = store
            .backup_path()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .into_owned();
        assert!(name.starts_with("config_"));
        assert!(name.ends_with(".json"));
        assert_eq!(name.len(), "config_".len() + 14 + ".json".len());
    }

    #[tokio::test]
    async fn test_invalid_document_is_refused() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("remote/config.json"), dir.path().join("local"));

        let mut config = Config::default();
        config.collection.max_parallelism = 0;

        let err = store.save(&config).await.unwrap_err();
        assert!(matches!(err, MonitorError::Config(_)));
        assert!(!store.local_cache_path().exists());
    }

    #[tokio::test]
    async fn test_stale_lock_is_reclaimed() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("config.json"), dir.path().join("local"))
            .with_lock_settings(LockSettings {
                wait: Duration::from_millis(300),
                poll: Duration::from_millis(20),
                stale_after: Duration::ZERO,
            });

        std::fs::write(store.lock_path(), b"pid=0").unwrap();
        std::thread::sleep(Duration::from_millis(20));

        let outcome = store.save(&Config::default()).await.unwrap();
        assert!(outcome.is_committed());
        assert!(!store.lock_path().exists());
    }
}

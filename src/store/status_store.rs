/*!
 * Snapshot persistence with store-and-forward replication
 *
 * Each snapshot is written to the local tree and to a flat pending-sync
 * outbox, then the outbox is flushed to the remote tree oldest-first.
 * Flushing halts at the first remote failure so the remote tree never
 * receives snapshots out of order; the next save (or an explicit
 * `flush_outbox`) resumes where it stopped.
 *
 * ```text
 * <local>/status/2025/03/14/collector-093015123456.json
 * <local>/pending-sync/status_2025_03_14_collector-093015123456.json
 * <remote>/status/2025/03/14/collector-093015123456.json
 * ```
 */

use chrono::{DateTime, Datelike, Utc};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::core::write_atomic;
use crate::error::{MonitorError, Result};
use crate::model::Snapshot;

pub const STATUS_DIR: &str = "status";
pub const OUTBOX_DIR: &str = "pending-sync";

/// Result of an outbox flush
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub flushed: usize,
    /// Entries still waiting in the outbox
    pub pending: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StatusStore;

impl StatusStore {
    /// Canonical relative location of a snapshot, derived from its creation time
    pub fn relative_path(created_at: &DateTime<Utc>) -> PathBuf {
        PathBuf::from(STATUS_DIR)
            .join(format!("{:04}", created_at.year()))
            .join(format!("{:02}", created_at.month()))
            .join(format!("{:02}", created_at.day()))
            .join(format!("collector-{}.json", created_at.format("%H%M%S%6f")))
    }

    /// Relative path flattened into a single outbox file name
    pub fn outbox_name(relative: &Path) -> String {
        relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("_")
    }

    /// Persist a snapshot locally, queue it for the remote tree and flush
    pub async fn save_snapshot(
        &self,
        snapshot: &Snapshot,
        remote_root: &Path,
        local_root: &Path,
    ) -> Result<FlushReport> {
        let relative = Self::relative_path(&snapshot.created_at);
        let payload = serde_json::to_vec_pretty(snapshot)
            .map_err(|e| MonitorError::json(&relative, e))?;

        let local = local_root.join(&relative);
        write_atomic(&local, &payload)
            .await
            .map_err(|e| MonitorError::io(&local, e))?;

        let pending = local_root
            .join(OUTBOX_DIR)
            .join(Self::outbox_name(&relative));
        write_atomic(&pending, &payload)
            .await
            .map_err(|e| MonitorError::io(&pending, e))?;

        debug!(path = %local.display(), "snapshot stored locally");
        self.flush_outbox(remote_root, local_root).await
    }

    /// Forward pending snapshots to the remote tree, oldest first
    ///
    /// Stops at the first entry that cannot be read or written remotely.
    /// Malformed entries are left in place and skipped.
    pub async fn flush_outbox(&self, remote_root: &Path, local_root: &Path) -> Result<FlushReport> {
        let outbox = local_root.join(OUTBOX_DIR);
        let entries = list_json_files(&outbox)
            .await
            .map_err(|e| MonitorError::io(&outbox, e))?;

        let mut report = FlushReport {
            flushed: 0,
            pending: entries.len(),
        };

        for entry in entries {
            let payload = match fs::read(&entry).await {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(path = %entry.display(), error = %e, "outbox entry unreadable, flush halted");
                    return Ok(report);
                }
            };
            let snapshot: Snapshot = match serde_json::from_slice(&payload) {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!(path = %entry.display(), error = %e, "malformed outbox entry, skipping");
                    continue;
                }
            };

            let target = remote_root.join(Self::relative_path(&snapshot.created_at));
            if let Err(e) = write_atomic(&target, &payload).await {
                warn!(
                    remote = %remote_root.display(),
                    pending = report.pending,
                    error = %e,
                    "remote status root unavailable, outbox flush deferred"
                );
                return Ok(report);
            }

            match fs::remove_file(&entry).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    // Re-sent next time; the remote write is an idempotent overwrite
                    warn!(path = %entry.display(), error = %e, "flushed outbox entry not removed");
                    report.flushed += 1;
                    continue;
                }
            }
            report.flushed += 1;
            report.pending -= 1;
        }

        if report.flushed > 0 {
            info!(flushed = report.flushed, pending = report.pending, "outbox flushed");
        }
        Ok(report)
    }

    /// Most recent snapshot, preferring the remote tree
    pub async fn load_latest(&self, remote_root: &Path, local_root: &Path) -> Result<Option<Snapshot>> {
        match latest_in(remote_root).await {
            Ok(Some(snapshot)) => return Ok(Some(snapshot)),
            Ok(None) => debug!(remote = %remote_root.display(), "remote status tree empty"),
            Err(e) => debug!(remote = %remote_root.display(), error = %e, "remote status tree unavailable"),
        }

        latest_in(local_root)
            .await
            .map_err(|e| MonitorError::io(local_root.join(STATUS_DIR), e))
    }

    /// Number of snapshots waiting to be forwarded
    pub async fn pending_count(&self, local_root: &Path) -> Result<usize> {
        let outbox = local_root.join(OUTBOX_DIR);
        list_json_files(&outbox)
            .await
            .map(|files| files.len())
            .map_err(|e| MonitorError::io(&outbox, e))
    }
}

/// Newest parseable snapshot under `<root>/status`
async fn latest_in(root: &Path) -> io::Result<Option<Snapshot>> {
    let status = root.join(STATUS_DIR);
    let mut files = Vec::new();
    let mut dirs = vec![status.clone()];

    while let Some(dir) = dirs.pop() {
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound && dir == status => return Ok(None),
            Err(e) => return Err(e),
        };
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            let path = entry.path();
            if file_type.is_dir() {
                dirs.push(path);
            } else if is_snapshot_file(&path) {
                files.push(path);
            }
        }
    }

    files.sort();
    for path in files.iter().rev() {
        let raw = fs::read(path).await?;
        match serde_json::from_slice(&raw) {
            Ok(snapshot) => return Ok(Some(snapshot)),
            Err(e) => warn!(path = %path.display(), error = %e, "ignoring malformed snapshot"),
        }
    }
    Ok(None)
}

async fn list_json_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if is_snapshot_file(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Skips in-flight temp files (`.name.uuid.tmp`)
fn is_snapshot_file(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy())
        .is_some_and(|n| !n.starts_with('.') && n.ends_with(".json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_relative_path_layout() {
        let at = Utc.with_ymd_and_hms(2025, 3, 4, 9, 30, 15).unwrap();
        let rel = StatusStore::relative_path(&at);
        assert_eq!(
            rel,
            PathBuf::from("status/2025/03/04/collector-093015000000.json")
        );
        assert_eq!(
            StatusStore::outbox_name(&rel),
            "status_2025_03_04_collector-093015000000.json"
        );
    }

    #[test]
    fn test_outbox_names_sort_like_creation_time() {
        let earlier = Utc.with_ymd_and_hms(2024, 12, 31, 23, 59, 59).unwrap();
        let later = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let a = StatusStore::outbox_name(&StatusStore::relative_path(&earlier));
        let b = StatusStore::outbox_name(&StatusStore::relative_path(&later));
        assert!(a < b);
    }

    #[test]
    fn test_temp_files_are_not_snapshots() {
        assert!(is_snapshot_file(Path::new("/x/collector-1.json")));
        assert!(!is_snapshot_file(Path::new("/x/.collector-1.json.abc.tmp")));
    }
}

/*!
 * Durable "collect now" command queue
 *
 * One JSON file per command. File names embed a nanosecond timestamp and
 * the command id, so they are unique and sort chronologically. Delivery is
 * at-least-once: a file that cannot be deleted after reading is delivered
 * again by the next `dequeue_all`.
 */

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::core::write_json_atomic;
use crate::error::{MonitorError, Result};

const COMMAND_PREFIX: &str = "collect-now-";
const COMMAND_SUFFIX: &str = ".json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub id: Uuid,
    pub requested_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub requested_at: DateTime<Utc>,
}

impl Command {
    pub fn collect_now(requested_by: impl Into<String>, reason: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            requested_by: requested_by.into(),
            reason,
            requested_at: Utc::now(),
        }
    }

    fn file_name(&self) -> String {
        format!(
            "{}{}-{}{}",
            COMMAND_PREFIX,
            self.requested_at.format("%Y%m%d%H%M%S%9f"),
            self.id.simple(),
            COMMAND_SUFFIX
        )
    }
}

#[derive(Debug, Clone)]
pub struct CommandQueue {
    dir: PathBuf,
}

impl CommandQueue {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist a command; returns the file it was written to
    pub async fn enqueue(&self, command: &Command) -> Result<PathBuf> {
        let path = self.dir.join(command.file_name());
        write_json_atomic(&path, command)
            .await
            .map_err(|e| MonitorError::io(&path, e))?;
        debug!(id = %command.id, requested_by = %command.requested_by, "command enqueued");
        Ok(path)
    }

    /// Drain every pending command in chronological order
    ///
    /// Malformed files are skipped but still removed; files that cannot be
    /// removed stay queued for the next call.
    pub async fn dequeue_all(&self) -> Result<Vec<Command>> {
        let mut commands = Vec::new();
        for path in self.pending_files().await? {
            match fs::read(&path).await {
                Ok(raw) => match serde_json::from_slice::<Command>(&raw) {
                    Ok(command) => commands.push(command),
                    Err(e) => warn!(path = %path.display(), error = %e, "skipping malformed command"),
                },
                // Removed by a concurrent consumer
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "command unreadable, leaving in queue");
                    continue;
                }
            }

            if let Err(e) = fs::remove_file(&path).await {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "command file not deleted, will be redelivered");
                }
            }
        }
        Ok(commands)
    }

    /// Number of commands waiting, without consuming them
    pub async fn pending(&self) -> Result<usize> {
        Ok(self.pending_files().await?.len())
    }

    async fn pending_files(&self) -> Result<Vec<PathBuf>> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(MonitorError::io(&self.dir, e)),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| MonitorError::io(&self.dir, e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(COMMAND_PREFIX) && name.ends_with(COMMAND_SUFFIX) {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_file_names_sort_chronologically() {
        let mut first = Command::collect_now("ops", None);
        let mut second = Command::collect_now("ops", None);
        first.requested_at = "2025-01-01T00:00:00.000000001Z".parse().unwrap();
        second.requested_at = "2025-01-01T00:00:00.000000002Z".parse().unwrap();
        assert!(first.file_name() < second.file_name());
        assert!(first.file_name().starts_with("collect-now-20250101000000000000001-"));
    }

    #[tokio::test]
    async fn test_missing_directory_is_empty_queue() {
        let dir = tempdir().unwrap();
        let queue = CommandQueue::new(dir.path().join("never-created"));
        assert!(queue.dequeue_all().await.unwrap().is_empty());
        assert_eq!(queue.pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unrelated_files_are_ignored() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"hello").unwrap();

        let queue = CommandQueue::new(dir.path());
        assert!(queue.dequeue_all().await.unwrap().is_empty());
        assert!(dir.path().join("notes.txt").exists());
    }
}

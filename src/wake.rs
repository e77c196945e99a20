/*!
 * Wake channel for the worker loop
 *
 * The worker sleeps between runs until whichever comes first: the poll
 * timer, a wake signal, or shutdown. Signals coalesce: any number of
 * `notify` calls made while the worker is busy produce a single early wake.
 */

use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{MonitorError, Result};

/// Why the worker woke up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    Timer,
    Signal,
    Shutdown,
}

/// Coalescing wake signal shared between producers and the worker
#[derive(Debug, Clone, Default)]
pub struct WakeSignal {
    notify: Arc<Notify>,
}

impl WakeSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request an early wake; a no-op if one is already pending
    pub fn notify(&self) {
        self.notify.notify_one();
    }

    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}

/// Wait for the first of: `delay` elapsed, a wake signal, or shutdown
pub async fn wait_for_wake(
    delay: Duration,
    wake: &WakeSignal,
    cancel: &CancellationToken,
) -> WakeReason {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => WakeReason::Shutdown,
        _ = wake.notified() => WakeReason::Signal,
        _ = tokio::time::sleep(delay) => WakeReason::Timer,
    }
}

/// Raises a wake signal when a command file lands in the queue directory
///
/// Lets another process (CLI, API host) wake the worker without sharing
/// memory with it. The watch stops when this value is dropped.
pub struct CommandWatcher {
    #[allow(dead_code)]
    watcher: Box<dyn Watcher + Send>,
    watched: PathBuf,
}

impl CommandWatcher {
    pub fn new(dir: &Path, wake: WakeSignal) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|e| MonitorError::io(dir, e))?;

        let mut arrivals = ArrivalFilter::default();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => match arrivals.accept(&event) {
                Some(path) => {
                    debug!(path = %path.display(), "command file arrived");
                    wake.notify();
                }
                None => trace!(kind = ?event.kind, "ignoring command directory event"),
            },
            Err(e) => debug!(error = %e, "command watcher error"),
        })
        .map_err(|e| MonitorError::Watch(format!("Failed to create filesystem watcher: {}", e)))?;

        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|e| MonitorError::Watch(format!("Failed to watch {}: {}", dir.display(), e)))?;

        Ok(Self {
            watcher: Box::new(watcher),
            watched: dir.to_path_buf(),
        })
    }

    pub fn watched_path(&self) -> &Path {
        &self.watched
    }
}

/// Turns raw directory events into one arrival per command file
///
/// Commands are written atomically, so they appear either as a create or
/// as the rename of a temp file. Backends may report a single rename more
/// than once (`To` and `Both` on inotify), so repeats for the last accepted
/// file are dropped.
#[derive(Debug, Default)]
struct ArrivalFilter {
    last: Option<PathBuf>,
}

impl ArrivalFilter {
    fn accept(&mut self, event: &Event) -> Option<PathBuf> {
        let arrival = matches!(
            event.kind,
            EventKind::Create(CreateKind::File | CreateKind::Any)
                | EventKind::Modify(ModifyKind::Name(RenameMode::To | RenameMode::Both | RenameMode::Any))
        );
        if !arrival {
            return None;
        }

        // For `Both` the destination is the last path
        let path = event.paths.iter().rev().find(|p| is_command_file(p))?;
        if self.last.as_ref() == Some(path) {
            return None;
        }
        self.last = Some(path.clone());
        Some(path.clone())
    }
}

fn is_command_file(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy())
        .is_some_and(|n| n.starts_with("collect-now-") && n.ends_with(".json"))
}

/*!
 * Persistence layer
 *
 * Every store writes through `core::atomic`, so a crash or a concurrent
 * reader never observes a torn file. Remote (shared) locations are treated
 * as eventually reachable: the local cache root is always written first and
 * is authoritative when the remote side is unavailable.
 */

pub mod command_queue;
pub mod config_store;
pub mod runtime_state;
pub mod status_store;

pub use command_queue::{Command, CommandQueue};
pub use config_store::{ConfigStore, LockSettings};
pub use runtime_state::{RunOutcome, RuntimeState, RuntimeStateStore};
pub use status_store::{FlushReport, StatusStore};

use serde::de::DeserializeOwned;
use std::io;
use std::path::Path;

use crate::error::{MonitorError, Result};

/// Read and parse a JSON document; a missing file is `Ok(None)`
pub(crate) async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(MonitorError::io(path, e)),
    };
    serde_json::from_slice(&raw)
        .map(Some)
        .map_err(|e| MonitorError::json(path, e))
}

/*!
 * Runtime state: a single record describing the last collection run
 *
 * Only the worker writes it, so no locking is involved.
 */

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::core::write_json_atomic;
use crate::error::{MonitorError, Result};
use crate::store::read_json;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RunOutcome {
    #[default]
    Never,
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeState {
    pub is_running: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_result: RunOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// `schedule` or `manual`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_trigger: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl RuntimeState {
    /// State written when a run begins; completion fields of the previous
    /// run are kept so readers can still see when data was last refreshed
    pub fn started(previous: RuntimeState, trigger: &str) -> Self {
        Self {
            is_running: true,
            last_started_at: Some(Utc::now()),
            last_result: RunOutcome::Running,
            last_error: None,
            last_trigger: Some(trigger.to_string()),
            ..previous
        }
    }

    pub fn finished(self, outcome: RunOutcome, error: Option<String>) -> Self {
        Self {
            is_running: false,
            last_completed_at: Some(Utc::now()),
            last_result: outcome,
            last_error: error,
            ..self
        }
    }
}

/// Loads and saves the runtime state record
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeStateStore;

impl RuntimeStateStore {
    /// Missing file yields the zero-value record
    pub async fn load(&self, root: &Path, relative_path: &Path) -> Result<RuntimeState> {
        Ok(read_json(&root.join(relative_path)).await?.unwrap_or_default())
    }

    /// Stamp `updatedAt` and write atomically
    pub async fn save(
        &self,
        root: &Path,
        relative_path: &Path,
        state: &RuntimeState,
    ) -> Result<RuntimeState> {
        let path = root.join(relative_path);
        let stamped = RuntimeState {
            updated_at: Some(Utc::now()),
            ..state.clone()
        };
        write_json_atomic(&path, &stamped)
            .await
            .map_err(|e| MonitorError::io(&path, e))?;
        Ok(stamped)
    }
}

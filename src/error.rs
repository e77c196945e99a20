/*!
 * Error types for dfsmon
 */

use dfsmon_topology::TopologyError;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::config::Config;

pub type Result<T> = std::result::Result<T, MonitorError>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_REJECTED: i32 = 2;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Malformed JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Topology query failed ({context}): {source}")]
    Provider {
        context: String,
        #[source]
        source: TopologyError,
    },

    /// Remote copy was committed by another writer after the caller loaded it
    #[error("Version conflict: attempted to save version {attempted} over persisted version {persisted}")]
    VersionConflict { attempted: u64, persisted: u64 },

    #[error("Timed out after {waited:?} waiting for lock {path}")]
    LockTimeout { path: PathBuf, waited: Duration },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Watch error: {0}")]
    Watch(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl MonitorError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        MonitorError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        MonitorError::Json {
            path: path.into(),
            source,
        }
    }

    pub fn provider(context: impl Into<String>, source: TopologyError) -> Self {
        MonitorError::Provider {
            context: context.into(),
            source,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, MonitorError::Cancelled)
    }

    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            MonitorError::VersionConflict { .. } | MonitorError::LockTimeout { .. } => {
                EXIT_REJECTED
            }
            _ => EXIT_FAILURE,
        }
    }
}

/// Outcome of a configuration save
///
/// Only `Committed` means the remote copy is current. `Unreachable` is a
/// partial success: the local cache holds the new version and the remote
/// update is deferred to the next save.
#[derive(Debug, Clone)]
pub enum SaveOutcome {
    Committed(Config),
    Unreachable { config: Config, reason: String },
    Conflict { attempted: u64, persisted: u64 },
    Timeout { path: PathBuf, waited: Duration },
}

impl SaveOutcome {
    /// The document as persisted, when the local cache accepted it
    pub fn config(&self) -> Option<&Config> {
        match self {
            SaveOutcome::Committed(config) | SaveOutcome::Unreachable { config, .. } => {
                Some(config)
            }
            _ => None,
        }
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, SaveOutcome::Committed(_))
    }

    /// Convert rejections into errors for `?` propagation
    pub fn into_result(self) -> Result<Config> {
        match self {
            SaveOutcome::Committed(config) | SaveOutcome::Unreachable { config, .. } => Ok(config),
            SaveOutcome::Conflict {
                attempted,
                persisted,
            } => Err(MonitorError::VersionConflict {
                attempted,
                persisted,
            }),
            SaveOutcome::Timeout { path, waited } => Err(MonitorError::LockTimeout { path, waited }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejections_become_errors() {
        let conflict = SaveOutcome::Conflict {
            attempted: 3,
            persisted: 5,
        };
        let err = conflict.into_result().unwrap_err();
        assert!(matches!(
            err,
            MonitorError::VersionConflict {
                attempted: 3,
                persisted: 5
            }
        ));
        assert_eq!(err.exit_code(), EXIT_REJECTED);
    }

    #[test]
    fn test_unreachable_is_partial_success() {
        let outcome = SaveOutcome::Unreachable {
            config: Config::default(),
            reason: "share offline".into(),
        };
        assert!(!outcome.is_committed());
        assert!(outcome.config().is_some());
        assert!(outcome.into_result().is_ok());
    }

    #[test]
    fn test_cancelled() {
        assert!(MonitorError::Cancelled.is_cancelled());
        assert_eq!(MonitorError::Cancelled.exit_code(), EXIT_FAILURE);
    }
}

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by the audit subsystem.
#[derive(Debug, Error)]
pub enum AuditError {
    /// Appending or flushing an event failed. Fatal to an organize run.
    #[error("audit log write failed at {path}: {source}")]
    Durability {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("not found: {0}")]
    NotFound(String),

    /// Content at a path no longer matches the recorded identity.
    #[error("identity mismatch at {path}: expected {expected}, found {actual}")]
    IdentityMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("filesystem error at {path}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("audit log at {path} is locked by another writer")]
    Locked { path: PathBuf },

    #[error("failed to parse audit event at {path}:{line}: {source}")]
    Parse {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize audit data: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("run {0} is still in progress")]
    RunInProgress(String),
}

impl AuditError {
    /// True for failures that must stop an organize run immediately.
    pub fn is_durability(&self) -> bool {
        matches!(self, AuditError::Durability { .. })
    }

    pub(crate) fn fs(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AuditError::Filesystem {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn durability(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AuditError::Durability {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, AuditError>;

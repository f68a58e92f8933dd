//! Audit log configuration.
//!
//! Loaded from the `[audit]` table of a TOML file:
//!
//! ```toml
//! [audit]
//! log_directory = "/var/lib/tidytrail/audit"
//! rotation_size_bytes = 10485760
//! rotation_period = "daily"
//! retention_days = 90
//! retention_runs = 0
//! min_retention_days = 7
//! ```

use crate::error::{AuditError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const DEFAULT_ROTATION_SIZE: u64 = 10 * 1024 * 1024;
const MIN_ROTATION_SIZE: u64 = 1024;

/// Time-based rotation schedule for the active segment.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum RotationPeriod {
    /// Size-only rotation.
    #[default]
    #[serde(rename = "")]
    None,
    #[serde(rename = "daily")]
    Daily,
    #[serde(rename = "weekly")]
    Weekly,
}

/// Settings consumed by the writer, reader and retention pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditConfig {
    /// Directory holding the log segments.
    #[serde(alias = "logDirectory")]
    pub log_directory: PathBuf,
    /// Seal the active segment once it would exceed this size. 0 disables.
    #[serde(default = "default_rotation_size", alias = "rotationSizeBytes")]
    pub rotation_size_bytes: u64,
    #[serde(default, alias = "rotationPeriod")]
    pub rotation_period: RotationPeriod,
    /// Prune sealed segments whose runs are older than this. 0 disables.
    #[serde(default = "default_retention_days", alias = "retentionDays")]
    pub retention_days: u32,
    /// Keep only segments touching this many most recent runs. 0 disables.
    #[serde(default, alias = "retentionRuns")]
    pub retention_runs: u32,
    /// Hard floor: nothing younger than this is ever pruned.
    #[serde(default = "default_min_retention_days", alias = "minRetentionDays")]
    pub min_retention_days: u32,
}

fn default_rotation_size() -> u64 {
    DEFAULT_ROTATION_SIZE
}

fn default_retention_days() -> u32 {
    90
}

fn default_min_retention_days() -> u32 {
    7
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    audit: AuditConfig,
}

impl AuditConfig {
    /// Defaults for everything except the log directory.
    pub fn new(log_directory: impl Into<PathBuf>) -> Self {
        Self {
            log_directory: log_directory.into(),
            rotation_size_bytes: DEFAULT_ROTATION_SIZE,
            rotation_period: RotationPeriod::None,
            retention_days: default_retention_days(),
            retention_runs: 0,
            min_retention_days: default_min_retention_days(),
        }
    }

    /// Load the `[audit]` table from a TOML file and validate it.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| AuditError::fs(path, e))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let file: ConfigFile =
            toml::from_str(content).map_err(|e| AuditError::Configuration(e.to_string()))?;
        file.audit.validate()?;
        Ok(file.audit)
    }

    pub fn validate(&self) -> Result<()> {
        if self.log_directory.as_os_str().is_empty() {
            return Err(AuditError::Configuration(
                "log_directory must not be empty".to_string(),
            ));
        }
        if self.rotation_size_bytes != 0 && self.rotation_size_bytes < MIN_ROTATION_SIZE {
            return Err(AuditError::Configuration(format!(
                "rotation_size_bytes must be 0 or at least {}, got {}",
                bytesize::ByteSize::b(MIN_ROTATION_SIZE),
                self.rotation_size_bytes
            )));
        }
        Ok(())
    }
}

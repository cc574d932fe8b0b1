use std::path::PathBuf;

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::BackupError;

/// Result of one snapshot attempt. A successful outcome always carries the
/// path of a snapshot that existed when the outcome was built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupOutcome {
    pub package_name: String,
    pub timestamp: String,
    pub backup_path: Option<PathBuf>,
    pub success: bool,
    pub error: Option<BackupError>,
    pub size_bytes: u64,
}

impl BackupOutcome {
    pub fn succeeded(
        package_name: impl Into<String>,
        timestamp: impl Into<String>,
        backup_path: PathBuf,
        size_bytes: u64,
    ) -> Self {
        Self {
            package_name: package_name.into(),
            timestamp: timestamp.into(),
            backup_path: Some(backup_path),
            success: true,
            error: None,
            size_bytes,
        }
    }

    pub fn failed(
        package_name: impl Into<String>,
        timestamp: impl Into<String>,
        error: BackupError,
    ) -> Self {
        Self {
            package_name: package_name.into(),
            timestamp: timestamp.into(),
            backup_path: None,
            success: false,
            error: Some(error),
            size_bytes: 0,
        }
    }

    pub fn can_restore(&self) -> bool {
        self.success && self.backup_path.is_some()
    }
}

/// A snapshot discovered on disk. Everything except `size_bytes` comes from
/// the directory name; the size is re-walked on every listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupRecord {
    pub package_name: String,
    pub timestamp: NaiveDateTime,
    #[serde(rename = "timestamp_raw")]
    pub timestamp_str: String,
    pub size_bytes: u64,
    pub path: PathBuf,
}

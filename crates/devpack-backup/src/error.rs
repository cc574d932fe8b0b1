use std::path::PathBuf;

use thiserror::Error;

/// Failure kinds of the backup subsystem.
///
/// Precondition and resource failures travel inside a failed
/// [`BackupOutcome`](crate::BackupOutcome); the remaining kinds are raised
/// wrapped in `anyhow::Error` and can be recovered with `downcast_ref`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackupError {
    #[error("installation directory does not exist: {}", .path.display())]
    SourceMissing { path: PathBuf },

    #[error("installation path is not a directory: {}", .path.display())]
    SourceNotDirectory { path: PathBuf },

    #[error("installation path has no directory name: {}", .path.display())]
    SourceUnnamed { path: PathBuf },

    #[error(
        "insufficient disk space for backup at {}: required {required_bytes} bytes, available {available_bytes} bytes",
        .path.display()
    )]
    InsufficientSpace {
        path: PathBuf,
        required_bytes: u64,
        available_bytes: u64,
    },

    #[error("backup directory already exists: {}", .path.display())]
    BackupExists { path: PathBuf },

    #[error("backup not found: expected '{expected}' under {}", .root.display())]
    BackupNotFound { expected: String, root: PathBuf },

    #[error("backup of '{package}' cannot be restored: no successful snapshot was recorded")]
    NotRestorable { package: String },

    #[error("backup directory no longer exists: {}", .path.display())]
    BackupVanished { path: PathBuf },

    #[error(
        "backup integrity check failed for {}: copied {backup_bytes} of {source_bytes} bytes; the partial backup was left in place",
        .backup.display()
    )]
    IntegrityCheckFailed {
        backup: PathBuf,
        source_bytes: u64,
        backup_bytes: u64,
    },

    #[error("backup content mismatch in {} at '{relative_path}'", .backup.display())]
    DigestMismatch {
        backup: PathBuf,
        relative_path: String,
    },

    #[error(
        "failed to remove {}; close any programs using files in this directory and try again",
        .path.display()
    )]
    RetireFailed { path: PathBuf },
}

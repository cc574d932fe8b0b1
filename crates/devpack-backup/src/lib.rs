mod catalog;
mod cleanup;
mod error;
mod fs_utils;
mod layout;
mod retention;
mod snapshot;
mod timestamp;
mod types;

pub use catalog::BackupCatalog;
pub use cleanup::{CleanupItem, CleanupPlanner, CleanupPreview, CleanupReport, CleanupRequest};
pub use error::BackupError;
pub use fs_utils::{dir_size, Fs2FreeSpace, FreeSpace};
pub use layout::{default_user_prefix, PrefixLayout};
pub use retention::{RetentionPolicy, RetentionReason, RetentionVerdict};
pub use snapshot::{RetireOutcome, SnapshotEngine};
pub use timestamp::{
    backup_dir_name, format_backup_timestamp, parse_backup_timestamp, BACKUP_MARKER,
    BACKUP_TIMESTAMP_FORMAT, BACKUP_TIMESTAMP_LEN,
};
pub use types::{BackupOutcome, BackupRecord};

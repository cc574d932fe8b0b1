mod config;

pub use config::{BackupSettings, DevpackConfig, DEFAULT_KEEP_COUNT, DEFAULT_MAX_AGE_DAYS};

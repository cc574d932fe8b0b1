use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_AGE_DAYS: u32 = 30;
pub const DEFAULT_KEEP_COUNT: usize = 5;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DevpackConfig {
    #[serde(default)]
    pub backup: BackupSettings,
}

/// Backup policy inputs. The backup subsystem only reads these; persistence
/// belongs to whoever owns the config file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BackupSettings {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Overrides the directory that holds `<name>.backup-<timestamp>` snapshots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u32,
    #[serde(default = "default_keep_count")]
    pub keep_count: usize,
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            root: None,
            max_age_days: DEFAULT_MAX_AGE_DAYS,
            keep_count: DEFAULT_KEEP_COUNT,
        }
    }
}

impl BackupSettings {
    pub fn backup_root_or(&self, fallback: impl Into<PathBuf>) -> PathBuf {
        self.root.clone().unwrap_or_else(|| fallback.into())
    }
}

impl DevpackConfig {
    pub fn from_toml_str(input: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(input).context("failed to parse devpack config")?;
        if let Some(root) = &config.backup.root {
            if root.as_os_str().is_empty() {
                return Err(anyhow!("backup.root must not be empty"));
            }
        }
        Ok(config)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read config file: {}", path.display()));
            }
        };

        Self::from_toml_str(&raw)
            .with_context(|| format!("failed parsing config file: {}", path.display()))
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        toml::to_string_pretty(self).context("failed to serialize devpack config")
    }
}

fn default_enabled() -> bool {
    true
}

fn default_max_age_days() -> u32 {
    DEFAULT_MAX_AGE_DAYS
}

fn default_keep_count() -> usize {
    DEFAULT_KEEP_COUNT
}

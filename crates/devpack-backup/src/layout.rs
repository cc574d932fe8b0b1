use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixLayout {
    prefix: PathBuf,
}

impl PrefixLayout {
    pub fn new(prefix: impl Into<PathBuf>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    pub fn pkgs_dir(&self) -> PathBuf {
        self.prefix.join("pkgs")
    }

    /// Installation directory of one package. Snapshots are written next to
    /// it, so `pkgs_dir` doubles as the default backup root.
    pub fn package_dir(&self, name: &str) -> PathBuf {
        self.pkgs_dir().join(name)
    }

    pub fn default_backup_root(&self) -> PathBuf {
        self.pkgs_dir()
    }

    pub fn config_path(&self) -> PathBuf {
        self.prefix.join("config.toml")
    }
}

pub fn default_user_prefix() -> Result<PathBuf> {
    if let Some(home) = std::env::var_os("DEVPACK_HOME").filter(|value| !value.is_empty()) {
        return Ok(PathBuf::from(home));
    }

    if cfg!(windows) {
        let app_data = std::env::var("LOCALAPPDATA")
            .context("LOCALAPPDATA is not set; cannot resolve Windows user prefix")?;
        return Ok(PathBuf::from(app_data).join("Devpack"));
    }

    let home = std::env::var("HOME").context("HOME is not set; cannot resolve user prefix")?;
    Ok(PathBuf::from(home).join(".devpack"))
}

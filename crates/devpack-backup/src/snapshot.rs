use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};
use chrono::{Local, NaiveDateTime};
use devpack_security::sha256_file_hex;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::fs_utils::{copy_tree, dir_size, remove_dir_if_exists, Fs2FreeSpace, FreeSpace};
use crate::{backup_dir_name, format_backup_timestamp, BackupError, BackupOutcome};

/// Free space must cover the source size plus this many tenths.
const SPACE_BUFFER_TENTHS: u128 = 11;
/// A snapshot must hold at least this percentage of the source bytes.
const MIN_INTEGRITY_PERCENT: u128 = 95;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetireOutcome {
    Absent,
    Deleted,
    /// Deletion failed; the directory now lives at the contained sibling path.
    Renamed(PathBuf),
}

/// Full-copy snapshots of installation directories named
/// `<dir>.backup-<yyyyMMdd-HHmmss>`. Snapshots land next to the installation
/// unless a backup root is set.
pub struct SnapshotEngine {
    free_space: Box<dyn FreeSpace>,
    backup_root: Option<PathBuf>,
}

impl Default for SnapshotEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotEngine {
    pub fn new() -> Self {
        Self::with_free_space(Fs2FreeSpace)
    }

    pub fn with_free_space(free_space: impl FreeSpace + 'static) -> Self {
        Self {
            free_space: Box::new(free_space),
            backup_root: None,
        }
    }

    /// Writes snapshots under `backup_root` instead of next to the
    /// installation. Pass the catalog root so listings find them.
    pub fn with_backup_root(mut self, backup_root: impl Into<PathBuf>) -> Self {
        self.backup_root = Some(backup_root.into());
        self
    }

    pub fn backup(&self, install_dir: &Path) -> Result<BackupOutcome> {
        self.backup_at(install_dir, Local::now().naive_local())
    }

    /// Missing sources, name collisions and low disk space come back as
    /// failed outcomes. An undersized copy is raised as
    /// [`BackupError::IntegrityCheckFailed`] with the partial snapshot left
    /// on disk.
    pub fn backup_at(&self, install_dir: &Path, now: NaiveDateTime) -> Result<BackupOutcome> {
        self.backup_at_with_copier(install_dir, now, copy_tree)
    }

    pub(crate) fn backup_at_with_copier<C>(
        &self,
        install_dir: &Path,
        now: NaiveDateTime,
        copier: C,
    ) -> Result<BackupOutcome>
    where
        C: Fn(&Path, &Path) -> Result<u64>,
    {
        let timestamp = format_backup_timestamp(now);
        let Some(package_name) = install_dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
        else {
            return Ok(BackupOutcome::failed(
                install_dir.display().to_string(),
                timestamp,
                BackupError::SourceUnnamed {
                    path: install_dir.to_path_buf(),
                },
            ));
        };

        if !install_dir.exists() {
            return Ok(BackupOutcome::failed(
                package_name,
                timestamp,
                BackupError::SourceMissing {
                    path: install_dir.to_path_buf(),
                },
            ));
        }
        if !install_dir.is_dir() {
            return Ok(BackupOutcome::failed(
                package_name,
                timestamp,
                BackupError::SourceNotDirectory {
                    path: install_dir.to_path_buf(),
                },
            ));
        }

        let target_root = match &self.backup_root {
            Some(root) => {
                fs::create_dir_all(root)
                    .with_context(|| format!("failed to create {}", root.display()))?;
                root.clone()
            }
            None => install_dir
                .parent()
                .filter(|parent| !parent.as_os_str().is_empty())
                .map_or_else(|| PathBuf::from("."), Path::to_path_buf),
        };

        let source_bytes = dir_size(install_dir)?;
        let required_bytes = buffered_requirement(source_bytes);
        let available_bytes = self
            .free_space
            .available_bytes(&target_root)
            .with_context(|| {
                format!("failed to query free space for {}", target_root.display())
            })?;
        if available_bytes < required_bytes {
            warn!(
                package = %package_name,
                required_bytes,
                available_bytes,
                "not enough disk space to back up installation"
            );
            return Ok(BackupOutcome::failed(
                package_name,
                timestamp,
                BackupError::InsufficientSpace {
                    path: target_root,
                    required_bytes,
                    available_bytes,
                },
            ));
        }

        let backup_path = target_root.join(backup_dir_name(&package_name, &timestamp));
        if backup_path.exists() {
            return Ok(BackupOutcome::failed(
                package_name,
                timestamp,
                BackupError::BackupExists { path: backup_path },
            ));
        }

        let copied_bytes = copier(install_dir, &backup_path)?;
        let backup_bytes = dir_size(&backup_path)?;
        if !meets_integrity_threshold(source_bytes, backup_bytes) {
            warn!(
                backup = %backup_path.display(),
                source_bytes,
                backup_bytes,
                "backup is smaller than its source"
            );
            return Err(BackupError::IntegrityCheckFailed {
                backup: backup_path,
                source_bytes,
                backup_bytes,
            }
            .into());
        }

        info!(
            package = %package_name,
            backup = %backup_path.display(),
            bytes = copied_bytes,
            "created backup"
        );
        Ok(BackupOutcome::succeeded(
            package_name,
            timestamp,
            backup_path,
            copied_bytes,
        ))
    }

    /// Removes `dir`, or moves it aside as `.deleted.<name>.<epoch-millis>`
    /// when another process keeps files in it open.
    pub fn delete_installation_directory(&self, dir: &Path) -> Result<RetireOutcome> {
        retire_directory_with_ops(dir, |path| fs::remove_dir_all(path), |from, to| {
            fs::rename(from, to)
        })
    }

    /// Replaces `target_dir` with the snapshot recorded in `outcome`.
    pub fn restore(&self, outcome: &BackupOutcome, target_dir: &Path) -> Result<u64> {
        let backup_path = match (&outcome.backup_path, outcome.can_restore()) {
            (Some(path), true) => path,
            _ => {
                return Err(BackupError::NotRestorable {
                    package: outcome.package_name.clone(),
                }
                .into());
            }
        };
        if !backup_path.is_dir() {
            return Err(BackupError::BackupVanished {
                path: backup_path.clone(),
            }
            .into());
        }

        remove_dir_if_exists(target_dir)?;
        let restored_bytes = copy_tree(backup_path, target_dir)?;
        info!(
            package = %outcome.package_name,
            backup = %backup_path.display(),
            target = %target_dir.display(),
            bytes = restored_bytes,
            "restored backup"
        );
        Ok(restored_bytes)
    }

    /// Compares SHA-256 digests of every regular file in `source` with its
    /// counterpart in `backup`. Returns the number of files checked.
    pub fn verify_contents(&self, source: &Path, backup: &Path) -> Result<usize> {
        let mut verified = 0_usize;
        for entry in WalkDir::new(source).follow_links(false) {
            let entry = entry.with_context(|| format!("failed to walk {}", source.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(source)
                .with_context(|| format!("failed to relativize {}", entry.path().display()))?;
            let counterpart = backup.join(rel);
            let mismatch = || BackupError::DigestMismatch {
                backup: backup.to_path_buf(),
                relative_path: rel.display().to_string(),
            };

            if !counterpart.is_file() {
                return Err(mismatch().into());
            }
            if sha256_file_hex(entry.path())? != sha256_file_hex(&counterpart)? {
                return Err(mismatch().into());
            }
            verified += 1;
        }
        Ok(verified)
    }
}

pub(crate) fn retire_directory_with_ops<D, R>(
    dir: &Path,
    delete: D,
    rename: R,
) -> Result<RetireOutcome>
where
    D: Fn(&Path) -> io::Result<()>,
    R: Fn(&Path, &Path) -> io::Result<()>,
{
    if !dir.exists() {
        return Ok(RetireOutcome::Absent);
    }

    let delete_err = match delete(dir) {
        Ok(()) => return Ok(RetireOutcome::Deleted),
        Err(err) => err,
    };

    let retired = retired_sibling_path(dir)?;
    match rename(dir, &retired) {
        Ok(()) => {
            info!(
                dir = %dir.display(),
                retired = %retired.display(),
                error = %delete_err,
                "directory could not be deleted; moved it aside instead"
            );
            Ok(RetireOutcome::Renamed(retired))
        }
        Err(rename_err) => {
            warn!(
                dir = %dir.display(),
                delete_error = %delete_err,
                rename_error = %rename_err,
                "failed to retire directory"
            );
            Err(
                anyhow!("delete failed: {delete_err}; rename failed: {rename_err}").context(
                    BackupError::RetireFailed {
                        path: dir.to_path_buf(),
                    },
                ),
            )
        }
    }
}

fn retired_sibling_path(dir: &Path) -> Result<PathBuf> {
    let name = dir
        .file_name()
        .ok_or_else(|| anyhow!("cannot retire directory without a name: {}", dir.display()))?;
    let parent = dir
        .parent()
        .ok_or_else(|| anyhow!("cannot retire directory without a parent: {}", dir.display()))?;
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system time is before unix epoch")?
        .as_millis();
    Ok(parent.join(format!(".deleted.{}.{millis}", name.to_string_lossy())))
}

pub(crate) fn buffered_requirement(source_bytes: u64) -> u64 {
    let buffered = (u128::from(source_bytes) * SPACE_BUFFER_TENTHS).div_ceil(10);
    u64::try_from(buffered).unwrap_or(u64::MAX)
}

pub(crate) fn meets_integrity_threshold(source_bytes: u64, backup_bytes: u64) -> bool {
    u128::from(backup_bytes) * 100 >= u128::from(source_bytes) * MIN_INTEGRITY_PERCENT
}

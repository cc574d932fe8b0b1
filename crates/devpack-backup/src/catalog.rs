use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime};
use devpack_core::BackupSettings;
use tracing::{debug, info, warn};

use crate::fs_utils::{copy_tree, dir_size, remove_dir_if_exists};
use crate::timestamp::{match_package_backup, split_backup_dir_name};
use crate::{backup_dir_name, BackupError, BackupRecord, RetentionPolicy};

/// Discovers, restores and prunes snapshots under one backup root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupCatalog {
    backup_root: PathBuf,
    policy: RetentionPolicy,
}

impl BackupCatalog {
    pub fn new(backup_root: impl Into<PathBuf>, policy: RetentionPolicy) -> Self {
        Self {
            backup_root: backup_root.into(),
            policy,
        }
    }

    /// `default_root` is used when the settings do not name a backup root.
    pub fn from_settings(settings: &BackupSettings, default_root: impl Into<PathBuf>) -> Self {
        Self::new(
            settings.backup_root_or(default_root),
            RetentionPolicy::from_settings(settings),
        )
    }

    pub fn backup_root(&self) -> &Path {
        &self.backup_root
    }

    pub fn policy(&self) -> RetentionPolicy {
        self.policy
    }

    pub fn backup_path(&self, record: &BackupRecord) -> PathBuf {
        record.path.clone()
    }

    /// Backups of `package_name`, newest first.
    pub fn list_backups(&self, package_name: &str) -> Result<Vec<BackupRecord>> {
        let mut records = Vec::new();
        for (dir_name, path) in self.scan_dirs()? {
            let Some((raw, timestamp)) = match_package_backup(&dir_name, package_name) else {
                continue;
            };
            records.push(build_record(package_name, raw, timestamp, path)?);
        }
        sort_newest_first(&mut records);
        Ok(records)
    }

    /// Every backup under the root grouped by package, each group newest first.
    pub fn list_all_backups(&self) -> Result<BTreeMap<String, Vec<BackupRecord>>> {
        let mut grouped: BTreeMap<String, Vec<BackupRecord>> = BTreeMap::new();
        for (dir_name, path) in self.scan_dirs()? {
            let Some((package_name, raw, timestamp)) = split_backup_dir_name(&dir_name) else {
                debug!(entry = %dir_name, "skipping non-backup directory");
                continue;
            };
            let record = build_record(package_name, raw, timestamp, path)?;
            grouped
                .entry(package_name.to_string())
                .or_default()
                .push(record);
        }
        for records in grouped.values_mut() {
            sort_newest_first(records);
        }
        Ok(grouped)
    }

    pub fn latest_backup(&self, package_name: &str) -> Result<Option<BackupRecord>> {
        Ok(self.list_backups(package_name)?.into_iter().next())
    }

    pub fn restore(&self, package_name: &str, timestamp: &str, target_dir: &Path) -> Result<u64> {
        self.restore_at(package_name, timestamp, target_dir, Local::now().naive_local())
    }

    /// Replaces `target_dir` with the named snapshot, then prunes the
    /// package's backups under the catalog policy as of `now`.
    pub fn restore_at(
        &self,
        package_name: &str,
        timestamp: &str,
        target_dir: &Path,
        now: NaiveDateTime,
    ) -> Result<u64> {
        let expected = backup_dir_name(package_name, timestamp);
        let backup_path = self.backup_root.join(&expected);
        if !backup_path.is_dir() {
            return Err(BackupError::BackupNotFound {
                expected,
                root: self.backup_root.clone(),
            }
            .into());
        }

        remove_dir_if_exists(target_dir)?;
        let restored_bytes = copy_tree(&backup_path, target_dir).with_context(|| {
            format!(
                "failed restoring {} onto {}",
                backup_path.display(),
                target_dir.display()
            )
        })?;
        info!(
            package = package_name,
            timestamp,
            target = %target_dir.display(),
            bytes = restored_bytes,
            "restored backup"
        );

        if let Err(err) = self.cleanup_old_backups_at(Some(package_name), now) {
            warn!(package = package_name, error = %err, "post-restore backup cleanup failed");
        }
        Ok(restored_bytes)
    }

    /// Restores the newest backup of `package_name`.
    pub fn restore_latest(&self, package_name: &str, target_dir: &Path) -> Result<BackupRecord> {
        let latest = self.latest_backup(package_name)?.ok_or_else(|| {
            BackupError::BackupNotFound {
                expected: backup_dir_name(package_name, "<latest>"),
                root: self.backup_root.clone(),
            }
        })?;
        self.restore(package_name, &latest.timestamp_str, target_dir)?;
        Ok(latest)
    }

    pub fn cleanup_old_backups(&self, package_name: Option<&str>) -> Result<usize> {
        self.cleanup_old_backups_at(package_name, Local::now().naive_local())
    }

    /// Applies the catalog policy to one package or all of them and returns
    /// how many backups were removed. Individual delete failures are logged
    /// and skipped.
    pub fn cleanup_old_backups_at(
        &self,
        package_name: Option<&str>,
        now: NaiveDateTime,
    ) -> Result<usize> {
        let mut deleted = 0_usize;
        for (package, backups) in self.backups_in_scope(package_name)? {
            for verdict in self.policy.evaluate(&backups, now) {
                let record = &backups[verdict.index];
                debug!(
                    package = %package,
                    timestamp = %record.timestamp_str,
                    reason = %verdict.reason,
                    "pruning backup"
                );
                if self.delete_backup(&package, record) {
                    deleted += 1;
                }
            }
        }
        Ok(deleted)
    }

    /// Best-effort delete for batch callers: failures are logged and reported
    /// as `false`, never raised.
    pub fn delete_backup(&self, package_name: &str, record: &BackupRecord) -> bool {
        match self.try_delete_backup(record) {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    package = package_name,
                    timestamp = %record.timestamp_str,
                    error = %err,
                    "failed to delete backup"
                );
                false
            }
        }
    }

    pub fn try_delete_backup(&self, record: &BackupRecord) -> Result<()> {
        let path = self.backup_path(record);
        fs::remove_dir_all(&path)
            .with_context(|| format!("failed to delete backup {}", path.display()))?;
        info!(
            package = %record.package_name,
            timestamp = %record.timestamp_str,
            bytes = record.size_bytes,
            "deleted backup"
        );
        Ok(())
    }

    pub(crate) fn backups_in_scope(
        &self,
        package_name: Option<&str>,
    ) -> Result<BTreeMap<String, Vec<BackupRecord>>> {
        match package_name {
            Some(name) => Ok(BTreeMap::from([(name.to_string(), self.list_backups(name)?)])),
            None => self.list_all_backups(),
        }
    }

    fn scan_dirs(&self) -> Result<Vec<(String, PathBuf)>> {
        if !self.backup_root.exists() {
            return Ok(Vec::new());
        }

        let mut dirs = Vec::new();
        for entry in fs::read_dir(&self.backup_root).with_context(|| {
            format!(
                "failed to read backup directory: {}",
                self.backup_root.display()
            )
        })? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            dirs.push((name, entry.path()));
        }
        Ok(dirs)
    }
}

fn build_record(
    package_name: &str,
    raw_timestamp: &str,
    timestamp: NaiveDateTime,
    path: PathBuf,
) -> Result<BackupRecord> {
    Ok(BackupRecord {
        package_name: package_name.to_string(),
        timestamp,
        timestamp_str: raw_timestamp.to_string(),
        size_bytes: dir_size(&path)?,
        path,
    })
}

fn sort_newest_first(records: &mut [BackupRecord]) {
    records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
}

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{Local, NaiveDateTime};
use serde::Serialize;
use tracing::{info, warn};

use crate::{BackupCatalog, BackupRecord, RetentionPolicy, RetentionReason};

/// Parameters of a cleanup run. Unset fields fall back to the catalog policy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupRequest {
    pub package: Option<String>,
    pub max_age_days: Option<u32>,
    pub keep_count: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupItem {
    pub package_name: String,
    pub backup: BackupRecord,
    pub reason: RetentionReason,
    pub delete_failed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupPreview {
    pub policy: RetentionPolicy,
    pub items: Vec<CleanupItem>,
    /// Backups observed per package before any filtering.
    pub totals: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub policy: RetentionPolicy,
    pub items: Vec<CleanupItem>,
    pub totals: BTreeMap<String, usize>,
}

/// Dry-run and execute views over the catalog's retention policy. All
/// deletion goes through the catalog.
#[derive(Debug, Clone, Copy)]
pub struct CleanupPlanner<'a> {
    catalog: &'a BackupCatalog,
}

impl<'a> CleanupPlanner<'a> {
    pub fn new(catalog: &'a BackupCatalog) -> Self {
        Self { catalog }
    }

    pub fn preview_cleanup(&self, request: &CleanupRequest) -> Result<CleanupPreview> {
        self.preview_cleanup_at(request, Local::now().naive_local())
    }

    pub fn preview_cleanup_at(
        &self,
        request: &CleanupRequest,
        now: NaiveDateTime,
    ) -> Result<CleanupPreview> {
        let policy = self
            .catalog
            .policy()
            .with_overrides(request.max_age_days, request.keep_count);

        let mut items = Vec::new();
        let mut totals = BTreeMap::new();
        for (package, backups) in self.catalog.backups_in_scope(request.package.as_deref())? {
            totals.insert(package.clone(), backups.len());
            for verdict in policy.evaluate(&backups, now) {
                items.push(CleanupItem {
                    package_name: package.clone(),
                    backup: backups[verdict.index].clone(),
                    reason: verdict.reason,
                    delete_failed: false,
                });
            }
        }

        Ok(CleanupPreview {
            policy,
            items,
            totals,
        })
    }

    pub fn execute_cleanup(&self, request: &CleanupRequest) -> Result<CleanupReport> {
        self.execute_cleanup_at(request, Local::now().naive_local())
    }

    /// Deletes exactly what `preview_cleanup_at` reports for the same inputs.
    /// A failed delete marks its item and the batch carries on.
    pub fn execute_cleanup_at(
        &self,
        request: &CleanupRequest,
        now: NaiveDateTime,
    ) -> Result<CleanupReport> {
        let preview = self.preview_cleanup_at(request, now)?;
        Ok(self.execute_preview(preview))
    }

    /// Deletes the items of an earlier preview without rescanning, so the
    /// set removed is the set that was shown.
    pub fn execute_preview(&self, preview: CleanupPreview) -> CleanupReport {
        let CleanupPreview {
            policy,
            mut items,
            totals,
        } = preview;

        self.delete_items(&mut items);

        let report = CleanupReport {
            policy,
            items,
            totals,
        };
        info!(
            deleted = report.deleted_count(),
            failed = report.failed_count(),
            bytes = report.reclaimed_bytes(),
            "backup cleanup finished"
        );
        report
    }

    pub(crate) fn delete_items(&self, items: &mut [CleanupItem]) {
        for item in items {
            if let Err(err) = self.catalog.try_delete_backup(&item.backup) {
                warn!(
                    package = %item.package_name,
                    timestamp = %item.backup.timestamp_str,
                    error = %err,
                    "backup cleanup skipped an entry"
                );
                item.delete_failed = true;
            }
        }
    }
}

impl CleanupPreview {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn reclaimable_bytes(&self) -> u64 {
        self.items.iter().map(|item| item.backup.size_bytes).sum()
    }
}

impl CleanupReport {
    pub fn reclaimed_bytes(&self) -> u64 {
        self.items
            .iter()
            .filter(|item| !item.delete_failed)
            .map(|item| item.backup.size_bytes)
            .sum()
    }

    pub fn deleted_count(&self) -> usize {
        self.items.iter().filter(|item| !item.delete_failed).count()
    }

    pub fn failed_count(&self) -> usize {
        self.items.iter().filter(|item| item.delete_failed).count()
    }
}

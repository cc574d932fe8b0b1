use std::fmt;

use chrono::{NaiveDateTime, TimeDelta};
use devpack_core::BackupSettings;
use serde::{Serialize, Serializer};

use crate::BackupRecord;

/// Age / keep-count retention. The two criteria are independent: a backup is
/// flagged when it is older than `max_age_days` OR sits at index
/// `keep_count` or later in the newest-first list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetentionPolicy {
    pub max_age_days: u32,
    pub keep_count: usize,
}

/// Serializes as its display string, e.g. `"older than 30 days"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionReason {
    pub older_than_days: Option<u32>,
    pub exceeds_keep_count: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionVerdict {
    /// Position in the newest-first list handed to `evaluate`.
    pub index: usize,
    pub reason: RetentionReason,
}

impl RetentionPolicy {
    pub fn new(max_age_days: u32, keep_count: usize) -> Self {
        Self {
            max_age_days,
            keep_count,
        }
    }

    pub fn from_settings(settings: &BackupSettings) -> Self {
        Self::new(settings.max_age_days, settings.keep_count)
    }

    pub fn with_overrides(self, max_age_days: Option<u32>, keep_count: Option<usize>) -> Self {
        Self {
            max_age_days: max_age_days.unwrap_or(self.max_age_days),
            keep_count: keep_count.unwrap_or(self.keep_count),
        }
    }

    /// Oldest timestamp that is still young enough to keep. `None` when the
    /// window reaches past the representable calendar.
    pub fn age_cutoff(&self, now: NaiveDateTime) -> Option<NaiveDateTime> {
        now.checked_sub_signed(TimeDelta::days(i64::from(self.max_age_days)))
    }

    /// `backups` must be sorted newest first, as the catalog returns them.
    pub fn evaluate(&self, backups: &[BackupRecord], now: NaiveDateTime) -> Vec<RetentionVerdict> {
        let cutoff = self.age_cutoff(now);
        backups
            .iter()
            .enumerate()
            .filter_map(|(index, backup)| {
                let too_old = cutoff.is_some_and(|cutoff| backup.timestamp < cutoff);
                let over_count = index >= self.keep_count;
                let reason = RetentionReason {
                    older_than_days: too_old.then_some(self.max_age_days),
                    exceeds_keep_count: over_count.then_some(self.keep_count),
                };
                reason.is_flagged().then_some(RetentionVerdict { index, reason })
            })
            .collect()
    }
}

impl Serialize for RetentionReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl RetentionReason {
    pub fn is_flagged(&self) -> bool {
        self.older_than_days.is_some() || self.exceeds_keep_count.is_some()
    }
}

impl fmt::Display for RetentionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.older_than_days, self.exceeds_keep_count) {
            (Some(days), Some(keep)) => {
                write!(f, "older than {days} days AND exceeds keep-count of {keep}")
            }
            (Some(days), None) => write!(f, "older than {days} days"),
            (None, Some(keep)) => write!(f, "exceeds keep-count of {keep}"),
            (None, None) => write!(f, "retained"),
        }
    }
}

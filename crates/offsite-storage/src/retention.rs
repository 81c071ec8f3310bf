//! Retention planning for pruning stored archives.

use crate::traits::{BackupInfo, StorageError, StorageResult};
use chrono::{DateTime, TimeDelta, Utc};

/// Cut-off for pruning: archives modified strictly before it are stale.
///
/// The leeway pushes the deadline forward so an archive created by the
/// previous run on a fixed schedule is not kept for one extra cycle because
/// of a few seconds of drift.
///
/// Fails with [`StorageError::ConfigError`] when either value moves the
/// deadline outside the representable date range.
pub fn deadline(
    now: DateTime<Utc>,
    retention_days: u32,
    leeway_secs: u64,
) -> StorageResult<DateTime<Utc>> {
    let retention = TimeDelta::try_days(i64::from(retention_days));
    let leeway = i64::try_from(leeway_secs)
        .ok()
        .and_then(TimeDelta::try_seconds);

    retention
        .and_then(|retention| now.checked_sub_signed(retention))
        .zip(leeway)
        .and_then(|(cut, leeway)| cut.checked_add_signed(leeway))
        .ok_or_else(|| {
            StorageError::ConfigError(format!(
                "Retention of {} days with {}s leeway is out of range",
                retention_days, leeway_secs
            ))
        })
}

/// Listed archives split by a deadline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrunePlan {
    pub stale: Vec<BackupInfo>,
    pub kept: Vec<BackupInfo>,
}

impl PrunePlan {
    pub fn new(candidates: Vec<BackupInfo>, deadline: DateTime<Utc>) -> Self {
        let (stale, kept) = candidates
            .into_iter()
            .partition(|info| info.modified_at < deadline);
        PrunePlan { stale, kept }
    }

    /// True when executing the plan would leave no archive behind.
    ///
    /// This usually means the retention period is misconfigured or backups
    /// stopped being produced; pruning must not run in that case.
    pub fn would_remove_all(&self) -> bool {
        !self.stale.is_empty() && self.kept.is_empty()
    }

    pub fn stale_names(&self) -> Vec<String> {
        self.stale.iter().map(|info| info.filename.clone()).collect()
    }

    pub fn total(&self) -> usize {
        self.stale.len() + self.kept.len()
    }
}

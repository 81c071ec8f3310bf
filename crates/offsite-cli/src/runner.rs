//! Drives every configured backend for one command and logs what happened.
//!
//! Backends run concurrently and independently: a failure at one never stops
//! the others. Every message and error a backend reports is logged here, the
//! storage layer itself stays silent.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use offsite_core::Config;
use offsite_storage::retention::{self, PrunePlan};
use offsite_storage::{
    create_enabled, BackupInfo, BatchOutcome, Storage, StorageId, StorageResult,
};
use serde::Serialize;
use std::ops::AddAssign;
use std::path::PathBuf;
use std::sync::Arc;

/// Tally of item outcomes across all backends.
///
/// Unsupported operations are counted as `skipped`, never as failures.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub successes: usize,
    pub failures: usize,
    pub skipped: usize,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failures == 0
    }

    /// Log and count every entry of a batch outcome.
    fn absorb(&mut self, id: StorageId, outcome: BatchOutcome) {
        for message in outcome.messages {
            tracing::info!(backend = %id, "{}", message);
            self.successes += 1;
        }

        for error in outcome.errors {
            if error.is_not_supported() {
                tracing::debug!(backend = %id, error = %error, "Operation skipped");
                self.skipped += 1;
            } else {
                tracing::error!(backend = %id, error = %error, "Operation failed");
                self.failures += 1;
            }
        }
    }
}

impl AddAssign for RunReport {
    fn add_assign(&mut self, other: RunReport) {
        self.successes += other.successes;
        self.failures += other.failures;
        self.skipped += other.skipped;
    }
}

/// How long archives are kept before pruning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retention {
    pub days: u32,
    pub leeway_secs: u64,
}

impl Retention {
    pub fn deadline(&self, now: DateTime<Utc>) -> StorageResult<DateTime<Utc>> {
        retention::deadline(now, self.days, self.leeway_secs)
    }
}

/// Archives listed at one backend.
#[derive(Debug, Clone, Serialize)]
pub struct BackendListing {
    pub backend: String,
    pub archives: Vec<BackupInfo>,
}

pub struct Runner {
    backends: Vec<Arc<dyn Storage>>,
    setup_failures: usize,
}

impl Runner {
    pub fn new(backends: Vec<Arc<dyn Storage>>) -> Self {
        Runner {
            backends,
            setup_failures: 0,
        }
    }

    /// Build every backend the configuration enables.
    ///
    /// A backend that cannot be constructed is logged and left out; it is
    /// counted as one failure in every report this runner produces.
    pub async fn from_config(config: &Config) -> Self {
        let mut backends = Vec::new();
        let mut setup_failures = 0;

        for (kind, created) in create_enabled(config).await {
            match created {
                Ok(storage) => {
                    tracing::debug!(backend = %storage.id(), "Storage backend ready");
                    backends.push(storage);
                }
                Err(e) => {
                    tracing::error!(backend = %kind, error = %e, "Failed to set up storage backend");
                    setup_failures += 1;
                }
            }
        }

        Runner {
            backends,
            setup_failures,
        }
    }

    pub fn backends(&self) -> &[Arc<dyn Storage>] {
        &self.backends
    }

    fn base_report(&self) -> RunReport {
        RunReport {
            failures: self.setup_failures,
            ..RunReport::default()
        }
    }

    /// Replicate `files` to every backend.
    pub async fn copy(&self, files: &[PathBuf]) -> RunReport {
        let outcomes = join_all(self.backends.iter().map(|storage| async move {
            (storage.id(), storage.copy(files).await)
        }))
        .await;

        let mut report = self.base_report();
        for (id, outcome) in outcomes {
            report.absorb(id, outcome);
        }

        tracing::info!(
            files = files.len(),
            backends = self.backends.len(),
            successes = report.successes,
            failures = report.failures,
            "Copy finished"
        );
        report
    }

    /// List archives starting with `prefix` at every backend.
    ///
    /// A backend that cannot be listed counts as a failure and is absent from
    /// the listings.
    pub async fn list(&self, prefix: &str) -> (RunReport, Vec<BackendListing>) {
        let results = join_all(self.backends.iter().map(|storage| async move {
            (storage.id(), storage.list(prefix).await)
        }))
        .await;

        let mut report = self.base_report();
        let mut listings = Vec::new();
        for (id, result) in results {
            match result {
                Ok(mut archives) => {
                    archives.sort_by(|a, b| a.modified_at.cmp(&b.modified_at));
                    tracing::debug!(backend = %id, count = archives.len(), "Listed archives");
                    report.successes += 1;
                    listings.push(BackendListing {
                        backend: id.to_string(),
                        archives,
                    });
                }
                Err(e) => {
                    tracing::error!(backend = %id, error = %e, "Failed to list archives");
                    report.failures += 1;
                }
            }
        }

        (report, listings)
    }

    /// Delete archives older than the retention period at every backend.
    ///
    /// With `dry_run` the stale archives are only logged and counted as skipped.
    pub async fn prune(&self, prefix: &str, retention: Retention, dry_run: bool) -> RunReport {
        let deadline = match retention.deadline(Utc::now()) {
            Ok(deadline) => deadline,
            Err(e) => {
                tracing::error!(retention_days = retention.days, error = %e, "Cannot prune");
                let mut report = self.base_report();
                report.failures += 1;
                return report;
            }
        };

        let reports = join_all(
            self.backends
                .iter()
                .map(|storage| prune_backend(storage.as_ref(), prefix, deadline, dry_run)),
        )
        .await;

        let mut report = self.base_report();
        for backend_report in reports {
            report += backend_report;
        }

        tracing::info!(
            retention_days = retention.days,
            dry_run,
            successes = report.successes,
            failures = report.failures,
            skipped = report.skipped,
            "Prune finished"
        );
        report
    }
}

async fn prune_backend(
    storage: &dyn Storage,
    prefix: &str,
    deadline: DateTime<Utc>,
    dry_run: bool,
) -> RunReport {
    let id = storage.id();
    let mut report = RunReport::default();

    let candidates = match storage.list(prefix).await {
        Ok(candidates) => candidates,
        Err(e) => {
            tracing::error!(backend = %id, error = %e, "Failed to list archives for pruning");
            report.failures += 1;
            return report;
        }
    };

    let plan = PrunePlan::new(candidates, deadline);

    if plan.stale.is_empty() {
        tracing::info!(
            backend = %id,
            total = plan.total(),
            "None of the existing archives are stale, nothing to prune"
        );
        return report;
    }

    if plan.would_remove_all() {
        tracing::warn!(
            backend = %id,
            total = plan.total(),
            deadline = %deadline,
            "Refusing to prune: every existing archive is older than the deadline"
        );
        report.skipped += plan.stale.len();
        return report;
    }

    if dry_run {
        for info in &plan.stale {
            tracing::info!(
                backend = %id,
                filename = %info.filename,
                modified_at = %info.modified_at,
                "Would delete stale archive"
            );
        }
        report.skipped += plan.stale.len();
        return report;
    }

    let outcome = storage.delete(&plan.stale_names()).await;
    report.absorb(id, outcome);

    tracing::info!(
        backend = %id,
        pruned = report.successes,
        total = plan.total(),
        "Pruned stale archives"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use offsite_core::LocalConfig;
    use offsite_storage::{LocalStorage, StorageError};
    use std::fs::File;
    use std::path::Path;
    use std::time::{Duration, SystemTime};
    use tempfile::tempdir;

    /// Backend that supports nothing.
    struct Unsupported;

    #[async_trait]
    impl Storage for Unsupported {
        fn id(&self) -> StorageId {
            StorageId::WEBDAV
        }

        async fn list(&self, _prefix: &str) -> StorageResult<Vec<BackupInfo>> {
            Err(StorageError::ListFailed("unreachable".to_string()))
        }

        async fn copy(&self, files: &[PathBuf]) -> BatchOutcome {
            let mut outcome = BatchOutcome::new();
            for file in files {
                outcome.push_error(StorageError::NotSupported(file.display().to_string()));
            }
            outcome
        }

        async fn delete(&self, _names: &[String]) -> BatchOutcome {
            BatchOutcome::new()
        }
    }

    fn write_archive(dir: &Path, name: &str, age_days: u64) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, name.as_bytes()).unwrap();
        let modified = SystemTime::now() - Duration::from_secs(age_days * 86_400);
        File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(modified)
            .unwrap();
        path
    }

    async fn local_runner(dir: &Path) -> Runner {
        let storage = LocalStorage::new(dir.to_path_buf(), None).await.unwrap();
        Runner::new(vec![Arc::new(storage)])
    }

    const WEEK: Retention = Retention {
        days: 7,
        leeway_secs: 60,
    };

    #[tokio::test]
    async fn test_copy_counts_messages() {
        let source = tempdir().unwrap();
        let target = tempdir().unwrap();
        let runner = local_runner(target.path()).await;

        let file = write_archive(source.path(), "backup-1.tar.gz", 0);
        let report = runner.copy(&[file]).await;

        assert_eq!(report.successes, 1);
        assert!(report.is_success());
        assert!(target.path().join("backup-1.tar.gz").exists());
    }

    #[tokio::test]
    async fn test_not_supported_is_skipped() {
        let runner = Runner::new(vec![Arc::new(Unsupported)]);
        let report = runner.copy(&[PathBuf::from("backup-1.tar.gz")]).await;

        assert_eq!(report.skipped, 1);
        assert_eq!(report.failures, 0);
    }

    #[tokio::test]
    async fn test_failed_backend_does_not_stop_others() {
        let target = tempdir().unwrap();
        write_archive(target.path(), "backup-1.tar.gz", 0);

        let local = LocalStorage::new(target.path().to_path_buf(), None)
            .await
            .unwrap();
        let runner = Runner::new(vec![Arc::new(Unsupported), Arc::new(local)]);

        let (report, listings) = runner.list("backup-").await;
        assert_eq!(report.failures, 1);
        assert_eq!(report.successes, 1);
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].backend, "Local");
        assert_eq!(listings[0].archives[0].filename, "backup-1.tar.gz");
    }

    #[tokio::test]
    async fn test_from_config_counts_setup_failures() {
        let dir = tempdir().unwrap();
        let config = Config {
            local: Some(LocalConfig {
                archive_dir: dir.path().to_path_buf(),
                latest_symlink: None,
            }),
            s3: Some(offsite_core::S3Config::new("backups")),
            ..Config::default()
        };

        let runner = Runner::from_config(&config).await;
        assert_eq!(runner.backends().len(), 1);

        let report = runner.copy(&[]).await;
        assert_eq!(report.failures, 1);
        assert!(!report.is_success());
    }

    #[tokio::test]
    async fn test_prune_deletes_only_stale() {
        let dir = tempdir().unwrap();
        write_archive(dir.path(), "backup-old.tar.gz", 30);
        write_archive(dir.path(), "backup-new.tar.gz", 1);
        write_archive(dir.path(), "other-old.tar.gz", 30);
        let runner = local_runner(dir.path()).await;

        let report = runner.prune("backup-", WEEK, false).await;

        assert_eq!(report.successes, 1);
        assert!(report.is_success());
        assert!(!dir.path().join("backup-old.tar.gz").exists());
        assert!(dir.path().join("backup-new.tar.gz").exists());
        assert!(dir.path().join("other-old.tar.gz").exists());
    }

    #[tokio::test]
    async fn test_prune_dry_run_keeps_files() {
        let dir = tempdir().unwrap();
        write_archive(dir.path(), "backup-old.tar.gz", 30);
        write_archive(dir.path(), "backup-new.tar.gz", 1);
        let runner = local_runner(dir.path()).await;

        let report = runner.prune("backup-", WEEK, true).await;

        assert_eq!(report.skipped, 1);
        assert_eq!(report.successes, 0);
        assert!(dir.path().join("backup-old.tar.gz").exists());
    }

    #[tokio::test]
    async fn test_prune_refuses_to_remove_everything() {
        let dir = tempdir().unwrap();
        write_archive(dir.path(), "backup-a.tar.gz", 30);
        write_archive(dir.path(), "backup-b.tar.gz", 20);
        let runner = local_runner(dir.path()).await;

        let report = runner.prune("backup-", WEEK, false).await;

        assert_eq!(report.skipped, 2);
        assert!(report.is_success());
        assert!(dir.path().join("backup-a.tar.gz").exists());
        assert!(dir.path().join("backup-b.tar.gz").exists());
    }

    #[tokio::test]
    async fn test_prune_with_out_of_range_retention_fails() {
        let dir = tempdir().unwrap();
        write_archive(dir.path(), "backup-old.tar.gz", 30);
        write_archive(dir.path(), "backup-new.tar.gz", 1);
        let runner = local_runner(dir.path()).await;

        let retention = Retention {
            days: u32::MAX,
            leeway_secs: 60,
        };
        let report = runner.prune("backup-", retention, false).await;

        assert_eq!(report.failures, 1);
        assert_eq!(report.successes, 0);
        assert!(dir.path().join("backup-old.tar.gz").exists());
    }

    #[test]
    fn test_reports_add_up() {
        let mut report = RunReport {
            successes: 1,
            failures: 0,
            skipped: 2,
        };
        report += RunReport {
            successes: 3,
            failures: 1,
            skipped: 0,
        };
        assert_eq!(
            report,
            RunReport {
                successes: 4,
                failures: 1,
                skipped: 2
            }
        );
    }
}

use crate::keys::archive_name;
use crate::traits::{BackupInfo, BatchOutcome, Storage, StorageError, StorageId, StorageResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Local filesystem storage implementation
///
/// Archives are copied into a single archive directory. When a latest symlink
/// name is configured, every successful copy re-points that symlink at the new
/// archive using a relative target so the directory stays relocatable.
#[derive(Clone, Debug)]
pub struct LocalStorage {
    archive_dir: PathBuf,
    latest_symlink: Option<String>,
}

impl LocalStorage {
    /// Create a new LocalStorage instance
    ///
    /// # Arguments
    /// * `archive_dir` - Directory archives are copied into (created if missing)
    /// * `latest_symlink` - Optional name of the "latest" symlink inside `archive_dir`
    pub async fn new(
        archive_dir: impl Into<PathBuf>,
        latest_symlink: Option<String>,
    ) -> StorageResult<Self> {
        let archive_dir = archive_dir.into();

        fs::create_dir_all(&archive_dir).await.map_err(|e| {
            StorageError::ConfigError(format!(
                "Failed to create archive directory {}: {}",
                archive_dir.display(),
                e
            ))
        })?;

        Ok(LocalStorage {
            archive_dir,
            latest_symlink,
        })
    }

    async fn copy_one(&self, file: &Path) -> StorageResult<String> {
        let name = archive_name(file)?;
        let destination = self.archive_dir.join(&name);

        // Copying a file onto itself truncates it.
        if same_file(file, &destination).await {
            return Ok(format!(
                "{} is already stored at {}",
                file.display(),
                destination.display()
            ));
        }

        fs::copy(file, &destination).await.map_err(|e| {
            StorageError::UploadFailed(format!(
                "Failed to copy {} to {}: {}",
                file.display(),
                destination.display(),
                e
            ))
        })?;

        Ok(format!(
            "Copied {} to {}",
            file.display(),
            destination.display()
        ))
    }
}

// The previous link is removed before the new one is created; a crash in
// between leaves no link at all until the next successful copy.
#[cfg(unix)]
async fn replace_symlink(target: &str, link: &Path) -> std::io::Result<()> {
    remove_if_present(link).await?;
    fs::symlink(target, link).await
}

#[cfg(windows)]
async fn replace_symlink(target: &str, link: &Path) -> std::io::Result<()> {
    remove_if_present(link).await?;
    fs::symlink_file(target, link).await
}

async fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a).await, fs::canonicalize(b).await) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

async fn remove_if_present(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path).await {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[async_trait]
impl Storage for LocalStorage {
    fn id(&self) -> StorageId {
        StorageId::LOCAL
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<BackupInfo>> {
        let mut entries = match fs::read_dir(&self.archive_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(StorageError::ListFailed(format!(
                    "Failed to read archive directory {}: {}",
                    self.archive_dir.display(),
                    e
                )))
            }
        };

        let mut candidates = Vec::new();
        loop {
            let entry = entries.next_entry().await.map_err(|e| {
                StorageError::ListFailed(format!(
                    "Failed to read entry in {}: {}",
                    self.archive_dir.display(),
                    e
                ))
            })?;
            let Some(entry) = entry else { break };

            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if !name.starts_with(prefix) {
                continue;
            }

            // symlink_metadata does not follow links, which keeps the latest
            // alias out of the result.
            let path = entry.path();
            let metadata = match fs::symlink_metadata(&path).await {
                Ok(metadata) => metadata,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(StorageError::ListFailed(format!(
                        "Failed to stat {}: {}",
                        path.display(),
                        e
                    )))
                }
            };
            if metadata.file_type().is_symlink() {
                continue;
            }

            let modified = metadata.modified().map_err(|e| {
                StorageError::ListFailed(format!(
                    "Failed to read modification time of {}: {}",
                    path.display(),
                    e
                ))
            })?;

            candidates.push(BackupInfo {
                filename: name.to_string(),
                modified_at: DateTime::<Utc>::from(modified),
            });
        }

        Ok(candidates)
    }

    async fn copy(&self, files: &[PathBuf]) -> BatchOutcome {
        let mut outcome = BatchOutcome::new();

        for file in files {
            match self.copy_one(file).await {
                Ok(message) => {
                    outcome.push_message(message);
                    if self.latest_symlink.is_some() {
                        outcome.record(self.link_latest(file).await);
                    }
                }
                Err(e) => outcome.push_error(e),
            }
        }

        outcome
    }

    async fn delete(&self, names: &[String]) -> BatchOutcome {
        let mut outcome = BatchOutcome::new();

        for name in names {
            let path = self.archive_dir.join(name);
            let result = match fs::remove_file(&path).await {
                Ok(()) => Ok(format!("Deleted {}", path.display())),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    Err(StorageError::NotFound(path.display().to_string()))
                }
                Err(e) => Err(StorageError::DeleteFailed(format!(
                    "Failed to delete {}: {}",
                    path.display(),
                    e
                ))),
            };
            outcome.record(result);
        }

        outcome
    }

    async fn link_latest(&self, file: &Path) -> StorageResult<String> {
        let Some(link_name) = self.latest_symlink.as_deref() else {
            return Err(StorageError::NotSupported(format!(
                "no latest symlink configured for {}",
                self.archive_dir.display()
            )));
        };

        let name = archive_name(file)?;
        let archive = self.archive_dir.join(&name);
        if fs::symlink_metadata(&archive).await.is_err() {
            return Err(StorageError::NotFound(archive.display().to_string()));
        }

        let link = self.archive_dir.join(link_name);
        replace_symlink(&name, &link).await.map_err(|e| {
            StorageError::BackendError(format!(
                "Failed to point symlink {} at {}: {}",
                link.display(),
                name,
                e
            ))
        })?;

        Ok(format!("Updated symlink {} to point to {}", link.display(), name))
    }
}

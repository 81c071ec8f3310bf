#[cfg(feature = "storage-local")]
use crate::LocalStorage;
#[cfg(feature = "storage-s3")]
use crate::S3Storage;
#[cfg(feature = "storage-webdav")]
use crate::WebDavStorage;
use crate::{Storage, StorageBackend, StorageError, StorageResult};
use offsite_core::Config;
use std::sync::Arc;

/// Create the storage backend for `backend` from its configuration section
pub async fn create_storage(
    backend: StorageBackend,
    config: &Config,
) -> StorageResult<Arc<dyn Storage>> {
    match backend {
        #[cfg(feature = "storage-local")]
        StorageBackend::Local => {
            let local = config.local.as_ref().ok_or_else(|| {
                StorageError::ConfigError("BACKUP_ARCHIVE not configured".to_string())
            })?;

            let storage =
                LocalStorage::new(local.archive_dir.clone(), local.latest_symlink.clone()).await?;
            Ok(Arc::new(storage))
        }

        #[cfg(not(feature = "storage-local"))]
        StorageBackend::Local => Err(StorageError::ConfigError(
            "Local storage backend not available (storage-local feature not enabled)".to_string(),
        )),

        #[cfg(feature = "storage-s3")]
        StorageBackend::S3 => {
            let s3 = config.s3.as_ref().ok_or_else(|| {
                StorageError::ConfigError("AWS_S3_BUCKET_NAME not configured".to_string())
            })?;

            let storage = S3Storage::new(s3)?;
            Ok(Arc::new(storage))
        }

        #[cfg(not(feature = "storage-s3"))]
        StorageBackend::S3 => Err(StorageError::ConfigError(
            "S3 storage backend not available (storage-s3 feature not enabled)".to_string(),
        )),

        #[cfg(feature = "storage-webdav")]
        StorageBackend::WebDav => {
            let webdav = config.webdav.as_ref().ok_or_else(|| {
                StorageError::ConfigError("WEBDAV_URL not configured".to_string())
            })?;

            let storage = WebDavStorage::new(webdav)?;
            Ok(Arc::new(storage))
        }

        #[cfg(not(feature = "storage-webdav"))]
        StorageBackend::WebDav => Err(StorageError::ConfigError(
            "WebDAV storage backend not available (storage-webdav feature not enabled)"
                .to_string(),
        )),
    }
}

/// Create every backend the configuration enables.
///
/// Each entry pairs the backend kind with its construction result so callers
/// can report failures per backend and keep going with the rest.
pub async fn create_enabled(
    config: &Config,
) -> Vec<(StorageBackend, StorageResult<Arc<dyn Storage>>)> {
    let mut created = Vec::new();
    for backend in config.enabled_backends() {
        created.push((backend, create_storage(backend, config).await));
    }
    created
}

#[cfg(all(test, feature = "storage-local"))]
mod tests {
    use super::*;
    use crate::StorageId;
    use offsite_core::{LocalConfig, WebDavConfig};
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_missing_section_is_config_error() {
        let config = Config::default();
        let err = create_storage(StorageBackend::Local, &config)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, StorageError::ConfigError(_)));
    }

    #[tokio::test]
    async fn test_creates_local_backend() {
        let dir = tempdir().unwrap();
        let config = Config {
            local: Some(LocalConfig {
                archive_dir: dir.path().join("archive"),
                latest_symlink: None,
            }),
            ..Config::default()
        };

        let storage = create_storage(StorageBackend::Local, &config).await.unwrap();
        assert_eq!(storage.id(), StorageId::LOCAL);
        assert!(dir.path().join("archive").is_dir());
    }

    #[cfg(feature = "storage-webdav")]
    #[tokio::test]
    async fn test_create_enabled_reports_each_backend() {
        let dir = tempdir().unwrap();
        let config = Config {
            local: Some(LocalConfig {
                archive_dir: dir.path().to_path_buf(),
                latest_symlink: None,
            }),
            webdav: Some(WebDavConfig {
                url: "https://dav.example.com".to_string(),
                username: String::new(),
                password: String::new(),
                path: "/".to_string(),
                insecure: false,
            }),
            ..Config::default()
        };

        let created = create_enabled(&config).await;
        assert_eq!(created.len(), 2);

        let (backend, local) = &created[0];
        assert_eq!(*backend, StorageBackend::Local);
        assert!(local.is_ok());

        let (backend, webdav) = &created[1];
        assert_eq!(*backend, StorageBackend::WebDav);
        assert!(matches!(webdav, Err(StorageError::ConfigError(_))));
    }
}

use crate::keys::{archive_name, join_remote};
use crate::traits::{BackupInfo, BatchOutcome, Storage, StorageError, StorageId, StorageResult};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::Error as ObjectStoreError;
use object_store::{
    Attribute, Attributes, ClientOptions, ObjectStore, ObjectStoreExt, PutOptions, PutPayload,
};
use offsite_core::{EndpointProto, S3Config};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;

/// Content type declared for every uploaded archive.
pub const ARCHIVE_CONTENT_TYPE: &str = "application/tar+gzip";

/// Credential source for the S3 client, resolved once at construction.
#[derive(Clone, PartialEq, Eq)]
pub enum S3Credentials {
    Static {
        access_key_id: String,
        secret_access_key: String,
    },
    /// Instance metadata / IAM role endpoint that hands out temporary credentials.
    RoleEndpoint { url: String },
}

impl S3Credentials {
    /// Pick the credential source from configuration.
    ///
    /// Static keys win when both halves are present; otherwise the IAM role
    /// endpoint is used. With neither, construction must fail.
    pub fn resolve(config: &S3Config) -> StorageResult<Self> {
        match (
            &config.access_key_id,
            &config.secret_access_key,
            &config.iam_role_endpoint,
        ) {
            (Some(key), Some(secret), _) => Ok(S3Credentials::Static {
                access_key_id: key.clone(),
                secret_access_key: secret.clone(),
            }),
            (_, _, Some(url)) => Ok(S3Credentials::RoleEndpoint { url: url.clone() }),
            _ => Err(StorageError::ConfigError(format!(
                "S3 bucket '{}' is configured, but no credentials were provided \
                 (set AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY, or AWS_IAM_ROLE_ENDPOINT)",
                config.bucket
            ))),
        }
    }
}

impl std::fmt::Debug for S3Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            S3Credentials::Static { access_key_id, .. } => f
                .debug_struct("Static")
                .field("access_key_id", access_key_id)
                .finish_non_exhaustive(),
            S3Credentials::RoleEndpoint { url } => {
                f.debug_struct("RoleEndpoint").field("url", url).finish()
            }
        }
    }
}

/// S3 storage implementation
#[derive(Clone)]
pub struct S3Storage {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    path: String,
}

impl S3Storage {
    /// Create a new S3Storage instance
    ///
    /// Fails without building a client when no credential source is configured,
    /// or when `endpoint_insecure` is requested for a plain-HTTP endpoint.
    pub fn new(config: &S3Config) -> StorageResult<Self> {
        let credentials = S3Credentials::resolve(config)?;

        if config.endpoint_insecure && config.endpoint_proto != EndpointProto::Https {
            return Err(StorageError::ConfigError(
                "AWS_ENDPOINT_INSECURE = true is only meaningful for https".to_string(),
            ));
        }

        let mut builder = AmazonS3Builder::new()
            .with_region(config.region.clone())
            .with_bucket_name(config.bucket.clone());

        if let Some(ref endpoint) = config.endpoint {
            builder = builder
                .with_endpoint(format!("{}://{}", config.endpoint_proto, endpoint))
                .with_allow_http(config.endpoint_proto == EndpointProto::Http);
        }

        builder = match credentials {
            S3Credentials::Static {
                access_key_id,
                secret_access_key,
            } => builder
                .with_access_key_id(access_key_id)
                .with_secret_access_key(secret_access_key),
            S3Credentials::RoleEndpoint { url } => builder.with_metadata_endpoint(url),
        };

        if config.endpoint_insecure {
            builder = builder
                .with_client_options(ClientOptions::new().with_allow_invalid_certificates(true));
        }

        let store = builder
            .build()
            .map_err(|e| StorageError::ConfigError(format!("Failed to set up S3 client: {}", e)))?;

        Ok(Self::with_store(
            Arc::new(store),
            config.bucket.clone(),
            config.path.clone(),
        ))
    }

    /// Wrap an already constructed object store.
    pub fn with_store(store: Arc<dyn ObjectStore>, bucket: String, path: String) -> Self {
        S3Storage {
            store,
            bucket,
            path: path.trim_matches('/').to_string(),
        }
    }

    fn object_key(&self, name: &str) -> ObjectPath {
        ObjectPath::from(join_remote(&self.path, name).as_str())
    }

    async fn upload_one(&self, file: &Path) -> StorageResult<String> {
        let name = archive_name(file)?;
        let location = self.object_key(&name);

        let data = fs::read(file).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to read {}: {}", file.display(), e))
        })?;

        let mut attributes = Attributes::new();
        attributes.insert(Attribute::ContentType, ARCHIVE_CONTENT_TYPE.into());
        let options = PutOptions {
            attributes,
            ..Default::default()
        };

        self.store
            .put_opts(&location, PutPayload::from(data), options)
            .await
            .map_err(|e| {
                StorageError::UploadFailed(format!(
                    "Failed to upload {} to s3://{}/{}: {}",
                    file.display(),
                    self.bucket,
                    location,
                    e
                ))
            })?;

        Ok(format!(
            "Uploaded {} to s3://{}/{}",
            file.display(),
            self.bucket,
            location
        ))
    }
}

#[async_trait]
impl Storage for S3Storage {
    fn id(&self) -> StorageId {
        StorageId::S3
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<BackupInfo>> {
        let root = (!self.path.is_empty()).then(|| ObjectPath::from(self.path.as_str()));
        let key_prefix = join_remote(&self.path, prefix);

        // Delimited listing stays at the first level below the remote path.
        let listing = self
            .store
            .list_with_delimiter(root.as_ref())
            .await
            .map_err(|e| {
                StorageError::ListFailed(format!(
                    "Failed to list objects in s3://{}/{}: {}",
                    self.bucket, self.path, e
                ))
            })?;

        Ok(listing
            .objects
            .into_iter()
            .filter(|meta| meta.location.as_ref().starts_with(&key_prefix))
            .map(|meta| BackupInfo {
                filename: meta.location.to_string(),
                modified_at: meta.last_modified,
            })
            .collect())
    }

    async fn copy(&self, files: &[PathBuf]) -> BatchOutcome {
        let mut outcome = BatchOutcome::new();
        for file in files {
            outcome.record(self.upload_one(file).await);
        }
        outcome
    }

    async fn delete(&self, names: &[String]) -> BatchOutcome {
        let mut outcome = BatchOutcome::new();
        if names.is_empty() {
            return outcome;
        }

        // S3 reports success when deleting a key that does not exist, so
        // existence is checked first to surface missing names per item.
        let mut existing = Vec::with_capacity(names.len());
        for name in names {
            let location = ObjectPath::from(name.as_str());
            match self.store.head(&location).await {
                Ok(_) => existing.push(location),
                Err(ObjectStoreError::NotFound { .. }) => outcome.push_error(
                    StorageError::NotFound(format!("s3://{}/{}", self.bucket, name)),
                ),
                Err(e) => outcome.push_error(StorageError::DeleteFailed(format!(
                    "Failed to look up s3://{}/{}: {}",
                    self.bucket, name, e
                ))),
            }
        }

        if existing.is_empty() {
            return outcome;
        }

        let locations = stream::iter(existing.into_iter().map(Ok)).boxed();
        let results: Vec<_> = self.store.delete_stream(locations).collect().await;

        for result in results {
            outcome.record(
                result
                    .map(|location| format!("Deleted s3://{}/{}", self.bucket, location))
                    .map_err(|e| {
                        StorageError::DeleteFailed(format!(
                            "Failed to delete object from s3://{}: {}",
                            self.bucket, e
                        ))
                    }),
            );
        }

        outcome
    }
}

#[cfg(all(test, feature = "storage-s3"))]
mod tests {
    use super::*;
    use object_store::memory::InMemory;
    use tempfile::tempdir;

    fn memory_storage(path: &str) -> (Arc<InMemory>, S3Storage) {
        let store = Arc::new(InMemory::new());
        let storage = S3Storage::with_store(store.clone(), "backups".to_string(), path.to_string());
        (store, storage)
    }

    fn static_config() -> S3Config {
        let mut config = S3Config::new("backups");
        config.access_key_id = Some("key".to_string());
        config.secret_access_key = Some("secret".to_string());
        config
    }

    #[test]
    fn test_construction_requires_credentials() {
        let err = S3Storage::new(&S3Config::new("backups")).err().unwrap();
        assert!(matches!(err, StorageError::ConfigError(_)));
        assert!(err.to_string().contains("no credentials were provided"));
    }

    #[test]
    fn test_half_static_credentials_are_not_enough() {
        let mut config = S3Config::new("backups");
        config.access_key_id = Some("key".to_string());
        assert!(S3Credentials::resolve(&config).is_err());
    }

    #[test]
    fn test_credentials_resolution_prefers_static() {
        let mut config = static_config();
        config.iam_role_endpoint = Some("http://169.254.169.254".to_string());
        assert!(matches!(
            S3Credentials::resolve(&config).unwrap(),
            S3Credentials::Static { .. }
        ));

        config.access_key_id = None;
        assert_eq!(
            S3Credentials::resolve(&config).unwrap(),
            S3Credentials::RoleEndpoint {
                url: "http://169.254.169.254".to_string()
            }
        );
    }

    #[test]
    fn test_debug_hides_secret() {
        let creds = S3Credentials::resolve(&static_config()).unwrap();
        assert!(!format!("{:?}", creds).contains("secret"));
    }

    #[test]
    fn test_insecure_requires_https() {
        let mut config = static_config();
        config.endpoint = Some("minio:9000".to_string());
        config.endpoint_proto = EndpointProto::Http;
        config.endpoint_insecure = true;

        let err = S3Storage::new(&config).err().unwrap();
        assert!(err.to_string().contains("only meaningful for https"));
    }

    #[test]
    fn test_construction_with_custom_endpoint() {
        let mut config = static_config();
        config.endpoint = Some("minio:9000".to_string());
        config.endpoint_insecure = true;
        assert!(S3Storage::new(&config).is_ok());

        let mut config = static_config();
        config.iam_role_endpoint = Some("http://169.254.169.254".to_string());
        config.access_key_id = None;
        config.endpoint = Some("127.0.0.1:9000".to_string());
        config.endpoint_proto = EndpointProto::Http;
        let storage = S3Storage::new(&config).unwrap();
        assert_eq!(storage.id(), StorageId::S3);
    }

    #[tokio::test]
    async fn test_empty_batches_make_no_calls() {
        // Points at a closed port; any transport call would fail.
        let mut config = static_config();
        config.endpoint = Some("127.0.0.1:1".to_string());
        config.endpoint_proto = EndpointProto::Http;
        let storage = S3Storage::new(&config).unwrap();

        assert!(storage.copy(&[]).await.is_empty());
        assert!(storage.delete(&[]).await.is_empty());
    }

    #[tokio::test]
    async fn test_upload_sets_key_and_content_type() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("backup-1.tar.gz");
        fs::write(&file, b"archive").await.unwrap();

        let (store, storage) = memory_storage("/nightly/");
        let outcome = storage.copy(&[file]).await;

        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.messages.len(), 1);
        assert!(outcome.messages[0].contains("s3://backups/nightly/backup-1.tar.gz"));

        let object = store
            .get(&ObjectPath::from("nightly/backup-1.tar.gz"))
            .await
            .unwrap();
        let content_type: Option<&str> = object
            .attributes
            .get(&Attribute::ContentType)
            .map(AsRef::as_ref);
        assert_eq!(content_type, Some(ARCHIVE_CONTENT_TYPE));
        assert_eq!(object.bytes().await.unwrap().as_ref(), b"archive");
    }

    #[tokio::test]
    async fn test_failed_upload_does_not_abort_batch() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("backup-0.tar.gz");
        let present = dir.path().join("backup-1.tar.gz");
        fs::write(&present, b"archive").await.unwrap();

        let (_, storage) = memory_storage("");
        let outcome = storage.copy(&[missing, present]).await;

        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].to_string().contains("backup-0.tar.gz"));
        assert_eq!(outcome.messages.len(), 1);
        assert!(outcome.messages[0].contains("backup-1.tar.gz"));
    }

    #[tokio::test]
    async fn test_list_keeps_first_level_keys_with_prefix() {
        let (store, storage) = memory_storage("nightly");
        for key in [
            "nightly/backup-1.tar.gz",
            "nightly/backup-2.tar.gz",
            "nightly/db-1.sql.gz",
            "nightly/archive/backup-0.tar.gz",
            "other/backup-3.tar.gz",
        ] {
            store
                .put(&ObjectPath::from(key), PutPayload::from_static(b"x"))
                .await
                .unwrap();
        }

        let mut names: Vec<String> = storage
            .list("backup-")
            .await
            .unwrap()
            .into_iter()
            .map(|info| info.filename)
            .collect();
        names.sort();

        assert_eq!(
            names,
            vec!["nightly/backup-1.tar.gz", "nightly/backup-2.tar.gz"]
        );
    }

    #[tokio::test]
    async fn test_list_empty_bucket() {
        let (_, storage) = memory_storage("nightly");
        assert!(storage.list("backup-").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_reports_missing_keys_per_item() {
        let (store, storage) = memory_storage("nightly");
        store
            .put(
                &ObjectPath::from("nightly/backup-1.tar.gz"),
                PutPayload::from_static(b"x"),
            )
            .await
            .unwrap();

        let outcome = storage
            .delete(&[
                "nightly/backup-0.tar.gz".to_string(),
                "nightly/backup-1.tar.gz".to_string(),
            ])
            .await;

        assert_eq!(outcome.errors.len(), 1);
        assert!(matches!(outcome.errors[0], StorageError::NotFound(_)));
        assert_eq!(outcome.messages.len(), 1);
        assert!(outcome.messages[0].contains("backup-1.tar.gz"));
        assert!(storage.list("backup-").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_no_latest_alias() {
        let (_, storage) = memory_storage("");
        let err = storage
            .link_latest(Path::new("backup-1.tar.gz"))
            .await
            .unwrap_err();
        assert!(err.is_not_supported());
    }
}

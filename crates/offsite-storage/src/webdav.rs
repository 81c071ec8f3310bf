use crate::keys::{archive_name, join_remote, last_segment};
use crate::traits::{BackupInfo, BatchOutcome, Storage, StorageError, StorageId, StorageResult};
use async_trait::async_trait;
use offsite_core::WebDavConfig;
use percent_encoding::percent_decode_str;
use reqwest_dav::list_cmd::ListEntity;
use reqwest_dav::{Auth, ClientBuilder, DecodeError, Depth, Error as DavError};
use std::path::{Path, PathBuf};
use tokio::fs;

const STATUS_NOT_FOUND: u16 = 404;
const STATUS_METHOD_NOT_ALLOWED: u16 = 405;

/// WebDAV storage implementation
///
/// Archives are written into a single remote collection on servers such as
/// Nextcloud or ownCloud, authenticating with basic auth.
pub struct WebDavStorage {
    client: reqwest_dav::Client,
    url: String,
    path: String,
}

impl WebDavStorage {
    /// Create a new WebDavStorage instance
    ///
    /// Username and password are mandatory; construction fails without them.
    pub fn new(config: &WebDavConfig) -> StorageResult<Self> {
        if config.url.is_empty() {
            return Err(StorageError::ConfigError(
                "WebDAV URL cannot be empty".to_string(),
            ));
        }

        if config.username.is_empty() || config.password.is_empty() {
            return Err(StorageError::ConfigError(
                "WEBDAV_URL is defined, but no credentials were provided".to_string(),
            ));
        }

        let agent = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.insecure)
            .build()
            .map_err(|e| {
                StorageError::ConfigError(format!("Failed to create HTTP client: {}", e))
            })?;

        let client = ClientBuilder::new()
            .set_host(config.url.clone())
            .set_auth(Auth::Basic(config.username.clone(), config.password.clone()))
            .set_agent(agent)
            .build()
            .map_err(|e| {
                StorageError::ConfigError(format!("Failed to create WebDAV client: {}", e))
            })?;

        Ok(WebDavStorage {
            client,
            url: config.url.clone(),
            path: config.path.trim_matches('/').to_string(),
        })
    }

    fn collection_path(&self) -> String {
        format!("/{}", self.path)
    }

    fn entry_path(&self, name: &str) -> String {
        format!("/{}", join_remote(&self.path, name))
    }

    /// Create the remote collection and every missing parent, one MKCOL per segment.
    async fn ensure_directory(&self) -> StorageResult<()> {
        let mut current = String::new();
        for segment in self.path.split('/').filter(|s| !s.is_empty()) {
            current.push('/');
            current.push_str(segment);

            if let Err(e) = self.client.mkcol(&current).await {
                // 405 means the collection already exists.
                if status_of(&e) != Some(STATUS_METHOD_NOT_ALLOWED) {
                    return Err(StorageError::UploadFailed(format!(
                        "Failed to create directory '{}' on WebDAV server {}: {}",
                        current, self.url, e
                    )));
                }
            }
        }
        Ok(())
    }

    async fn upload_one(&self, file: &Path) -> StorageResult<String> {
        let name = archive_name(file)?;
        let data = fs::read(file).await.map_err(|e| {
            StorageError::UploadFailed(format!(
                "Failed to read {} for upload: {}",
                file.display(),
                e
            ))
        })?;

        self.ensure_directory().await?;

        let remote = self.entry_path(&name);
        self.client.put(&remote, data).await.map_err(|e| {
            StorageError::UploadFailed(format!(
                "Failed to upload {} to WebDAV path {}: {}",
                file.display(),
                remote,
                e
            ))
        })?;

        Ok(format!(
            "Uploaded {} to WebDAV path {}",
            file.display(),
            remote
        ))
    }
}

/// HTTP status carried by a WebDAV error, if the server answered at all.
fn status_of(err: &DavError) -> Option<u16> {
    match err {
        DavError::Reqwest(e) => e.status().map(|s| s.as_u16()),
        DavError::Decode(DecodeError::StatusMismatched(e)) => Some(e.response_code),
        DavError::Decode(DecodeError::Server(e)) => Some(e.response_code),
        _ => None,
    }
}

fn decoded_name(href: &str) -> String {
    let raw = last_segment(href);
    percent_decode_str(raw)
        .decode_utf8()
        .map(|name| name.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

#[async_trait]
impl Storage for WebDavStorage {
    fn id(&self) -> StorageId {
        StorageId::WEBDAV
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<BackupInfo>> {
        let entries = match self
            .client
            .list(&self.collection_path(), Depth::Number(1))
            .await
        {
            Ok(entries) => entries,
            Err(e) if status_of(&e) == Some(STATUS_NOT_FOUND) => return Ok(Vec::new()),
            Err(e) => {
                return Err(StorageError::ListFailed(format!(
                    "Failed to list WebDAV path {}: {}",
                    self.collection_path(),
                    e
                )))
            }
        };

        Ok(entries
            .into_iter()
            .filter_map(|entry| match entry {
                ListEntity::File(file) => Some(file),
                ListEntity::Folder(_) => None,
            })
            .filter_map(|file| {
                let name = decoded_name(&file.href);
                name.starts_with(prefix).then(|| BackupInfo {
                    filename: name,
                    modified_at: file.last_modified,
                })
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

        for name in names {
            let remote = self.entry_path(name);
            let result = match self.client.delete(&remote).await {
                Ok(()) => Ok(format!("Deleted WebDAV path {}", remote)),
                Err(e) if status_of(&e) == Some(STATUS_NOT_FOUND) => {
                    Err(StorageError::NotFound(format!("{}{}", self.url, remote)))
                }
                Err(e) => Err(StorageError::DeleteFailed(format!(
                    "Failed to delete WebDAV path {}: {}",
                    remote, e
                ))),
            };
            outcome.record(result);
        }

        outcome
    }
}

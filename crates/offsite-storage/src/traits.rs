//! Storage abstraction trait
//!
//! This module defines the Storage trait that all storage backends must implement,
//! together with the value types every backend shares.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("List failed: {0}")]
    ListFailed(String),

    #[error("File not found: {0}")]
    NotFound(String),

    /// The backend has no notion of the requested operation.
    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl StorageError {
    /// Whether this error reports a missing capability rather than a failure.
    ///
    /// Callers should skip such errors instead of retrying or failing the run.
    pub fn is_not_supported(&self) -> bool {
        matches!(self, StorageError::NotSupported(_))
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Stable label naming a backend variant, used for log attribution only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StorageId(&'static str);

impl StorageId {
    pub const LOCAL: StorageId = StorageId("Local");
    pub const S3: StorageId = StorageId("S3");
    pub const WEBDAV: StorageId = StorageId("WebDAV");

    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl Display for StorageId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.0)
    }
}

/// An archive already stored at a backend.
///
/// `filename` is the name as known to the backend that listed it and is
/// accepted as-is by that backend's [`Storage::delete`]. Aliases such as the
/// local "latest" symlink are never reported.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct BackupInfo {
    pub filename: String,
    pub modified_at: DateTime<Utc>,
}

/// Result of a multi-file `copy` or `delete`.
///
/// `messages` and `errors` are ordered independently and are **not**
/// index-aligned with the input list: one input file may produce two messages
/// (e.g. upload and alias update), a message and an error, or errors only.
/// Reconcile by the file name embedded in the text, never by position.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub messages: Vec<String>,
    pub errors: Vec<StorageError>,
}

impl BatchOutcome {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of one sub-step.
    pub fn record(&mut self, result: StorageResult<String>) {
        match result {
            Ok(message) => self.messages.push(message),
            Err(e) => self.errors.push(e),
        }
    }

    pub fn push_message(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
    }

    pub fn push_error(&mut self, error: StorageError) {
        self.errors.push(error);
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.errors.is_empty()
    }
}

/// Storage abstraction trait
///
/// All storage backends (local filesystem, S3, WebDAV) implement this trait so
/// the runner can replicate, list and prune archives without knowing which
/// transport sits behind a backend.
///
/// `copy` and `delete` never fail as a whole: every item is attempted in input
/// order and its outcome is recorded in the returned [`BatchOutcome`]. Empty
/// input produces an empty outcome without touching the transport.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Label of this backend. Constant for the lifetime of the instance.
    fn id(&self) -> StorageId;

    /// List stored archives whose name starts with `prefix`.
    ///
    /// Order is backend-native; sort by `modified_at` if chronology matters.
    /// Fails only when the enumeration itself cannot be performed; a missing
    /// or empty location yields an empty list.
    async fn list(&self, prefix: &str) -> StorageResult<Vec<BackupInfo>>;

    /// Transfer each local file to the backend, continuing past failures.
    async fn copy(&self, files: &[PathBuf]) -> BatchOutcome;

    /// Remove each named archive, continuing past failures.
    ///
    /// A name that does not exist is reported as that item's error.
    async fn delete(&self, names: &[String]) -> BatchOutcome;

    /// Point the backend's "latest" alias at an archive it already stores.
    ///
    /// Backends without an alias concept return [`StorageError::NotSupported`].
    async fn link_latest(&self, file: &Path) -> StorageResult<String> {
        Err(StorageError::NotSupported(format!(
            "{} storage has no latest alias (requested for {})",
            self.id(),
            file.display()
        )))
    }
}

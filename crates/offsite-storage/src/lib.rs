//! Offsite Storage Library
//!
//! This crate provides the storage abstraction used to replicate finished
//! backup archives. It includes the Storage trait and implementations for the
//! local filesystem, S3-compatible object storage and WebDAV.
//!
//! # Archive naming
//!
//! Every backend stores an archive under the base name of its local source
//! file, placed in the backend's configured location:
//!
//! - **Local**: `{archive_dir}/{name}`
//! - **S3**: `{path}/{name}` inside the bucket
//! - **WebDAV**: `{path}/{name}` below the server URL
//!
//! Name derivation is centralized in the `keys` module so all backends stay
//! consistent.

pub mod factory;
pub(crate) mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
pub mod retention;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod traits;
#[cfg(feature = "storage-webdav")]
pub mod webdav;

// Re-export commonly used types
pub use factory::{create_enabled, create_storage};
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
pub use offsite_core::StorageBackend;
pub use retention::PrunePlan;
#[cfg(feature = "storage-s3")]
pub use s3::S3Storage;
pub use traits::{BackupInfo, BatchOutcome, Storage, StorageError, StorageId, StorageResult};
#[cfg(feature = "storage-webdav")]
pub use webdav::WebDavStorage;

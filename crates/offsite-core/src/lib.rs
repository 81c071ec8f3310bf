//! Offsite Core Library
//!
//! This crate provides the configuration surface and the backend tag enum
//! shared by the storage adapters and the command-line runner.

pub mod config;
pub mod storage_types;

// Re-export commonly used types
pub use config::{
    Config, EndpointProto, LocalConfig, PruneConfig, S3Config, WebDavConfig,
};
pub use storage_types::StorageBackend;

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

/// Storage backend types
///
/// This enum is the tag the factory dispatches on. It lives in core because the
/// configuration decides which backends are enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageBackend {
    Local,
    S3,
    WebDav,
}

impl StorageBackend {
    /// All backend types, in the order the runner drives them.
    pub const ALL: [StorageBackend; 3] = [
        StorageBackend::Local,
        StorageBackend::S3,
        StorageBackend::WebDav,
    ];
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(StorageBackend::Local),
            "s3" => Ok(StorageBackend::S3),
            "webdav" => Ok(StorageBackend::WebDav),
            _ => Err(anyhow::anyhow!("Invalid storage backend: {}", s)),
        }
    }
}

impl Display for StorageBackend {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            StorageBackend::Local => write!(f, "local"),
            StorageBackend::S3 => write!(f, "s3"),
            StorageBackend::WebDav => write!(f, "webdav"),
        }
    }
}

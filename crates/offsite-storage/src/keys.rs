//! Shared name derivation for storage backends.
//!
//! Every backend stores an archive under the base name of its local source
//! path, joined onto the backend's own location (directory, key prefix or
//! remote collection).

use crate::traits::{StorageError, StorageResult};
use std::path::Path;

/// Base name of `file`, the name an archive is stored under.
pub fn archive_name(file: &Path) -> StorageResult<String> {
    file.file_name()
        .and_then(|name| name.to_str())
        .map(String::from)
        .ok_or_else(|| {
            StorageError::InvalidKey(format!(
                "{} has no valid UTF-8 file name",
                file.display()
            ))
        })
}

/// Join a `/`-separated remote prefix and a name, collapsing redundant slashes.
///
/// An empty prefix yields the bare name.
pub fn join_remote(prefix: &str, name: &str) -> String {
    let prefix = prefix.trim_matches('/');
    let name = name.trim_start_matches('/');
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}

/// Last `/`-separated segment of a key or href, ignoring a trailing slash.
pub fn last_segment(key: &str) -> &str {
    key.trim_end_matches('/').rsplit('/').next().unwrap_or_default()
}

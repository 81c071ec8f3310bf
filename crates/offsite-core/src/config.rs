//! Configuration module
//!
//! Settings are read from the process environment (a `.env` file is honoured)
//! and split into one optional section per storage backend. A backend is
//! enabled when its anchor variable is present: `BACKUP_ARCHIVE` for local,
//! `AWS_S3_BUCKET_NAME` for S3 and `WEBDAV_URL` for WebDAV.

use std::env;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::PathBuf;
use std::str::FromStr;

use crate::storage_types::StorageBackend;

const DEFAULT_AWS_REGION: &str = "us-east-1";
const DEFAULT_WEBDAV_PATH: &str = "/";
const DEFAULT_PRUNING_PREFIX: &str = "backup-";
const DEFAULT_PRUNING_LEEWAY_SECS: u64 = 60;

/// Local archive directory settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalConfig {
    pub archive_dir: PathBuf,
    /// Name of the "latest" symlink inside `archive_dir`, if one is maintained.
    pub latest_symlink: Option<String>,
}

/// Protocol used to reach the S3 endpoint
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum EndpointProto {
    Http,
    #[default]
    Https,
}

impl FromStr for EndpointProto {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "http" => Ok(EndpointProto::Http),
            "https" => Ok(EndpointProto::Https),
            other => Err(anyhow::anyhow!(
                "AWS_ENDPOINT_PROTO must be 'http' or 'https', got '{}'",
                other
            )),
        }
    }
}

impl Display for EndpointProto {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            EndpointProto::Http => write!(f, "http"),
            EndpointProto::Https => write!(f, "https"),
        }
    }
}

/// S3-compatible object storage settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct S3Config {
    pub bucket: String,
    /// Key prefix every archive is stored under (may be empty).
    pub path: String,
    /// Endpoint host (optionally with port). `None` targets AWS itself.
    pub endpoint: Option<String>,
    pub endpoint_proto: EndpointProto,
    pub endpoint_insecure: bool,
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub iam_role_endpoint: Option<String>,
}

impl S3Config {
    /// Settings for `bucket` with every optional field at its default.
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            path: String::new(),
            endpoint: None,
            endpoint_proto: EndpointProto::Https,
            endpoint_insecure: false,
            region: DEFAULT_AWS_REGION.to_string(),
            access_key_id: None,
            secret_access_key: None,
            iam_role_endpoint: None,
        }
    }
}

/// WebDAV server settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WebDavConfig {
    pub url: String,
    pub username: String,
    pub password: String,
    /// Remote directory archives are written to.
    pub path: String,
    pub insecure: bool,
}

/// Retention settings used by `prune`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PruneConfig {
    /// Archives older than this many days are pruned. `None` disables pruning.
    pub retention_days: Option<u32>,
    /// Added to the pruning deadline so archives created at roughly the same
    /// time of day are not spared by a few seconds.
    pub leeway_secs: u64,
    /// Only archives whose name starts with this prefix are considered.
    pub prefix: String,
}

impl Default for PruneConfig {
    fn default() -> Self {
        Self {
            retention_days: None,
            leeway_secs: DEFAULT_PRUNING_LEEWAY_SECS,
            prefix: DEFAULT_PRUNING_PREFIX.to_string(),
        }
    }
}

/// Application configuration
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Config {
    pub local: Option<LocalConfig>,
    pub s3: Option<S3Config>,
    pub webdav: Option<WebDavConfig>,
    pub prune: PruneConfig,
}

impl Config {
    /// Load configuration from the process environment, reading `.env` first.
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let local = get("BACKUP_ARCHIVE").map(|dir| LocalConfig {
            archive_dir: PathBuf::from(dir),
            latest_symlink: get("BACKUP_LATEST_SYMLINK"),
        });

        let s3 = match get("AWS_S3_BUCKET_NAME") {
            Some(bucket) => Some(S3Config {
                bucket,
                path: get("AWS_S3_PATH").unwrap_or_default(),
                endpoint: get("AWS_ENDPOINT"),
                endpoint_proto: get("AWS_ENDPOINT_PROTO")
                    .map(|s| s.parse::<EndpointProto>())
                    .transpose()?
                    .unwrap_or_default(),
                endpoint_insecure: parse_bool("AWS_ENDPOINT_INSECURE", get("AWS_ENDPOINT_INSECURE"))?,
                region: get("AWS_REGION").unwrap_or_else(|| DEFAULT_AWS_REGION.to_string()),
                access_key_id: get("AWS_ACCESS_KEY_ID"),
                secret_access_key: get("AWS_SECRET_ACCESS_KEY"),
                iam_role_endpoint: get("AWS_IAM_ROLE_ENDPOINT"),
            }),
            None => None,
        };

        let webdav = match get("WEBDAV_URL") {
            Some(url) => Some(WebDavConfig {
                url,
                username: get("WEBDAV_USERNAME").unwrap_or_default(),
                password: get("WEBDAV_PASSWORD").unwrap_or_default(),
                path: get("WEBDAV_PATH").unwrap_or_else(|| DEFAULT_WEBDAV_PATH.to_string()),
                insecure: parse_bool("WEBDAV_URL_INSECURE", get("WEBDAV_URL_INSECURE"))?,
            }),
            None => None,
        };

        let prune = PruneConfig {
            retention_days: get("BACKUP_RETENTION_DAYS")
                .map(|s| {
                    s.trim().parse::<u32>().map_err(|_| {
                        anyhow::anyhow!("BACKUP_RETENTION_DAYS must be a non-negative number")
                    })
                })
                .transpose()?,
            leeway_secs: get("BACKUP_PRUNING_LEEWAY_SECS")
                .map(|s| {
                    s.trim().parse::<u64>().map_err(|_| {
                        anyhow::anyhow!("BACKUP_PRUNING_LEEWAY_SECS must be a non-negative number")
                    })
                })
                .transpose()?
                .unwrap_or(DEFAULT_PRUNING_LEEWAY_SECS),
            prefix: get("BACKUP_PRUNING_PREFIX")
                .unwrap_or_else(|| DEFAULT_PRUNING_PREFIX.to_string()),
        };

        let config = Config {
            local,
            s3,
            webdav,
            prune,
        };

        config.validate()?;
        Ok(config)
    }

    /// Backends with a configuration section, in driving order.
    pub fn enabled_backends(&self) -> Vec<StorageBackend> {
        StorageBackend::ALL
            .into_iter()
            .filter(|backend| match backend {
                StorageBackend::Local => self.local.is_some(),
                StorageBackend::S3 => self.s3.is_some(),
                StorageBackend::WebDav => self.webdav.is_some(),
            })
            .collect()
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.enabled_backends().is_empty() {
            return Err(anyhow::anyhow!(
                "No storage backend configured. Set BACKUP_ARCHIVE, AWS_S3_BUCKET_NAME or WEBDAV_URL"
            ));
        }

        if let Some(local) = &self.local {
            if let Some(link) = &local.latest_symlink {
                if link.contains('/') || link == "." || link == ".." {
                    return Err(anyhow::anyhow!(
                        "BACKUP_LATEST_SYMLINK must be a plain file name, got '{}'",
                        link
                    ));
                }
            }
        }

        if let Some(webdav) = &self.webdav {
            if !webdav.url.starts_with("http://") && !webdav.url.starts_with("https://") {
                return Err(anyhow::anyhow!(
                    "WEBDAV_URL must start with http:// or https://"
                ));
            }
        }

        if self.prune.prefix.is_empty() {
            return Err(anyhow::anyhow!("BACKUP_PRUNING_PREFIX cannot be empty"));
        }

        Ok(())
    }
}

fn parse_bool(key: &str, value: Option<String>) -> Result<bool, anyhow::Error> {
    match value.as_deref().map(|v| v.trim().to_lowercase()) {
        None => Ok(false),
        Some(v) => match v.as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(anyhow::anyhow!("{} must be a boolean, got '{}'", key, v)),
        },
    }
}

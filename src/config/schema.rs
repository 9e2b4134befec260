//! Configuration schema for lookaside
//!
//! Configuration is stored at `~/.config/lookaside/config.toml`, with an
//! optional project `.lookaside.toml` layered on top.

use crate::hash::HashAlgorithm;
use crate::transport::{AuthMode, BackoffKind, LowSpeedLimit, RetryPolicy, UrlLayout};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Lookaside cache endpoint and transfer policy
    pub cache: CacheConfig,

    /// Workspace file names
    pub workspace: WorkspaceConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
        }
    }
}

/// Lookaside cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Base URL objects are downloaded from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,

    /// Upload CGI endpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_url: Option<String>,

    /// Namespace path in front of the package, e.g. "rpms"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Package name; defaults to the workspace directory name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,

    /// Algorithm for newly registered sources
    pub hash: HashAlgorithm,

    /// Download URL layout
    pub layout: UrlLayout,

    /// Upload authentication
    pub auth: AuthMode,

    /// Send "namespace/package" as the upload name
    pub namespaced_uploads: bool,

    /// Seconds without a single byte before a transfer is abandoned
    pub stall_timeout_secs: u64,

    /// Seconds allowed for establishing a connection
    pub connect_timeout_secs: u64,

    /// Minimum average bytes/s (0 = disabled)
    pub low_speed_limit: u64,

    /// Window over which `low_speed_limit` is averaged
    pub low_speed_time_secs: u64,

    /// Attempts per transfer, including the first
    pub retries: u32,

    /// Delay growth between attempts
    pub backoff: BackoffKind,

    pub backoff_base_ms: u64,

    pub backoff_max_ms: u64,

    /// Concurrent downloads
    pub workers: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            download_url: None,
            upload_url: None,
            namespace: None,
            package: None,
            hash: HashAlgorithm::Sha512,
            layout: UrlLayout::default(),
            auth: AuthMode::default(),
            namespaced_uploads: false,
            stall_timeout_secs: 60,
            connect_timeout_secs: 30,
            low_speed_limit: 1000,
            low_speed_time_secs: 300,
            retries: 3,
            backoff: BackoffKind::default(),
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
            workers: 4,
        }
    }
}

impl CacheConfig {
    /// Transfer policy described by this section
    pub fn retry_policy(&self) -> RetryPolicy {
        let low_speed = (self.low_speed_limit > 0 && self.low_speed_time_secs > 0).then(|| LowSpeedLimit {
            bytes_per_sec: self.low_speed_limit,
            window: Duration::from_secs(self.low_speed_time_secs),
        });

        RetryPolicy {
            max_attempts: self.retries.max(1),
            backoff: self.backoff,
            base_delay: Duration::from_millis(self.backoff_base_ms),
            max_delay: Duration::from_millis(self.backoff_max_ms),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            stall_timeout: Duration::from_secs(self.stall_timeout_secs),
            low_speed,
        }
    }
}

/// Workspace layout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Manifest file name, relative to the workspace root
    pub manifest: String,

    /// Version-control exclusion list, relative to the workspace root
    pub ignore_file: String,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            manifest: "sources".to_string(),
            ignore_file: ".gitignore".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = Config::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(toml.contains("[general]"));
        assert!(toml.contains("[cache]"));
        assert!(toml.contains("hash = \"sha512\""));
        assert!(!toml.contains("download_url"));
    }

    #[test]
    fn config_deserializes_empty() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.workspace.manifest, "sources");
        assert_eq!(config.cache.hash, HashAlgorithm::Sha512);
        assert_eq!(config.cache.layout, UrlLayout::HashtypePath);
    }

    #[test]
    fn config_deserializes_partial() {
        let toml = r#"
            [cache]
            download_url = "https://src.example.org/repo/pkgs"
            namespace = "rpms"
            layout = "hash-path"
            hash = "md5"
            backoff = "linear"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.cache.download_url.as_deref(), Some("https://src.example.org/repo/pkgs"));
        assert_eq!(config.cache.layout, UrlLayout::HashPath);
        assert_eq!(config.cache.hash, HashAlgorithm::Md5);
        assert_eq!(config.cache.backoff, BackoffKind::Linear);
        assert_eq!(config.cache.retries, 3); // default preserved
    }

    #[test]
    fn retry_policy_from_config() {
        let cache = CacheConfig {
            retries: 5,
            stall_timeout_secs: 10,
            low_speed_limit: 0,
            ..CacheConfig::default()
        };
        let policy = cache.retry_policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.stall_timeout, Duration::from_secs(10));
        assert!(policy.low_speed.is_none());

        let default = CacheConfig::default().retry_policy();
        assert_eq!(default.low_speed.unwrap().window, Duration::from_secs(300));
    }

    #[test]
    fn unknown_layout_rejected() {
        assert!(toml::from_str::<Config>("[cache]\nlayout = \"flat\"").is_err());
    }
}

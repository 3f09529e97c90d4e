//! Daemon configuration
//!
//! Loaded from a JSON file chosen with `-c <file>`, falling back to
//! `<config_dir>/drivecache/config.json`. A missing file is replaced by a
//! template so the operator has something to fill in.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

/// Environment variable that overrides `accessToken`
pub const ACCESS_TOKEN_ENV: &str = "GRAPH_ACCESS_TOKEN";

/// Mount type that only allows file results
pub const MOUNT_FILE_ONLY: &str = "file.only";

const DEFAULT_ENDPOINT: &str = "https://graph.microsoft.com/v1.0";
const DEFAULT_SOCKET_PATH: &str = "/tmp/drivecache.sock";

/// Configuration errors. All of these are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file not found; a template was written to {0}")]
    TemplateWritten(PathBuf),

    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("No drives configured")]
    NoDrives,

    #[error("Drive name '{0}' is used more than once")]
    DuplicateDrive(String),

    #[error("Drive '{0}': refreshInterval must be greater than zero")]
    ZeroRefreshInterval(String),

    #[error("Drive '{drive}': refreshInterval ({refresh}s) must be shorter than downloadUrlValidity ({validity}s)")]
    RefreshTooLong {
        drive: String,
        refresh: u64,
        validity: u64,
    },

    #[error("Drive '{drive}': cachingTimeout ({timeout}s) must be shorter than downloadUrlValidity ({validity}s)")]
    CachingTimeoutTooLong {
        drive: String,
        timeout: u64,
        validity: u64,
    },

    #[error("Drive '{0}': volume mount target must not be empty")]
    EmptyMountTarget(String),
}

/// Path-rewrite rule from a user-facing prefix to a drive-relative prefix
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMount {
    /// `file.only` restricts results to files
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Drive-relative prefix the request is rewritten to
    pub source: String,
    /// User-facing prefix that triggers the rewrite
    pub target: String,
    /// Carried for the HTTP layer; not checked by the cache
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl VolumeMount {
    pub fn is_file_only(&self) -> bool {
        self.kind.as_deref() == Some(MOUNT_FILE_ONLY)
    }
}

/// Per-drive settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveConfig {
    /// Name used to address the drive over the socket
    pub name: String,
    /// Subtree of the remote drive that this drive exposes
    #[serde(default)]
    pub root_path: String,
    /// Seconds between refresher sweeps
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u64,
    /// Seconds a download URL stays valid; the hard staleness window
    #[serde(default = "default_download_url_validity")]
    pub download_url_validity: u64,
    /// Seconds before a stuck populate is eligible again
    #[serde(default = "default_caching_timeout")]
    pub caching_timeout: u64,
    /// Expected remote drive ID; startup fails on mismatch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drive_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drive_type: Option<String>,
    /// Token for this drive's account; falls back to the global token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    /// Name served for the root folder (defaults to the remote drive name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub volume_mounts: Vec<VolumeMount>,
}

impl DriveConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval)
    }

    pub fn download_url_validity(&self) -> Duration {
        Duration::from_secs(self.download_url_validity)
    }

    pub fn caching_timeout(&self) -> Duration {
        Duration::from_secs(self.caching_timeout)
    }
}

/// Top-level daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Unix socket the request surface listens on
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,
    /// Directory holding `<driveId>.cache.json` snapshots
    #[serde(default = "default_snapshot_dir")]
    pub snapshot_dir: PathBuf,
    #[serde(default = "default_endpoint")]
    pub graph_endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    /// Per-request timeout for the drive API
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub drives: Vec<DriveConfig>,
}

fn default_refresh_interval() -> u64 {
    300
}

fn default_download_url_validity() -> u64 {
    3600
}

fn default_caching_timeout() -> u64 {
    120
}

fn default_request_timeout() -> u64 {
    30
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_socket_path() -> PathBuf {
    PathBuf::from(DEFAULT_SOCKET_PATH)
}

fn default_snapshot_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("drivecache")
}

/// Default config location: `<config_dir>/drivecache/config.json`
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("drivecache")
        .join("config.json")
}

impl Config {
    /// Load, apply the environment override and validate.
    ///
    /// Writes a template and returns `TemplateWritten` when the file is missing.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            Self::write_template(path)?;
            return Err(ConfigError::TemplateWritten(path.to_path_buf()));
        }

        let bytes = fs::read(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Config =
            serde_json::from_slice(&bytes).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        config.apply_token_override(std::env::var(ACCESS_TOKEN_ENV).ok());
        config.validate()?;

        info!(path = %path.display(), drives = config.drives.len(), "Loaded config");
        Ok(config)
    }

    /// A non-empty token from the environment wins over the file
    pub fn apply_token_override(&mut self, token: Option<String>) {
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            self.access_token = Some(token);
        }
    }

    /// Bearer token for a drive's client
    pub fn access_token_for(&self, drive: &DriveConfig) -> String {
        drive
            .access_token
            .clone()
            .filter(|t| !t.is_empty())
            .or_else(|| self.access_token.clone())
            .unwrap_or_default()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.drives.is_empty() {
            return Err(ConfigError::NoDrives);
        }

        let mut names = HashSet::new();
        for drive in &self.drives {
            if !names.insert(drive.name.as_str()) {
                return Err(ConfigError::DuplicateDrive(drive.name.clone()));
            }
            if drive.refresh_interval == 0 {
                return Err(ConfigError::ZeroRefreshInterval(drive.name.clone()));
            }
            if drive.refresh_interval >= drive.download_url_validity {
                return Err(ConfigError::RefreshTooLong {
                    drive: drive.name.clone(),
                    refresh: drive.refresh_interval,
                    validity: drive.download_url_validity,
                });
            }
            if drive.caching_timeout >= drive.download_url_validity {
                return Err(ConfigError::CachingTimeoutTooLong {
                    drive: drive.name.clone(),
                    timeout: drive.caching_timeout,
                    validity: drive.download_url_validity,
                });
            }
            if drive
                .volume_mounts
                .iter()
                .any(|m| m.target.trim_matches('/').is_empty())
            {
                return Err(ConfigError::EmptyMountTarget(drive.name.clone()));
            }
        }
        Ok(())
    }

    /// Config written when none exists
    pub fn template() -> Self {
        Self {
            socket_path: default_socket_path(),
            snapshot_dir: default_snapshot_dir(),
            graph_endpoint: default_endpoint(),
            access_token: Some(String::new()),
            request_timeout_secs: default_request_timeout(),
            drives: vec![DriveConfig {
                name: "default".to_string(),
                root_path: String::new(),
                refresh_interval: default_refresh_interval(),
                download_url_validity: default_download_url_validity(),
                caching_timeout: default_caching_timeout(),
                drive_id: None,
                drive_type: None,
                access_token: None,
                display_name: None,
                volume_mounts: Vec::new(),
            }],
        }
    }

    fn write_template(path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_vec_pretty(&Self::template()).map_err(|source| {
            ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }
        })?;
        fs::write(path, json).map_err(io_err)?;
        info!(path = %path.display(), "Wrote config template");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Config {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_defaults_applied() {
        let config = parse(r#"{ "drives": [ { "name": "main" } ] }"#);
        assert_eq!(config.graph_endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.socket_path, PathBuf::from(DEFAULT_SOCKET_PATH));
        let drive = &config.drives[0];
        assert_eq!(drive.refresh_interval, 300);
        assert_eq!(drive.download_url_validity, 3600);
        assert_eq!(drive.caching_timeout, 120);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_volume_mount_parsing() {
        let config = parse(
            r#"{ "drives": [ { "name": "main", "rootPath": "/Public",
                 "volumeMounts": [
                   { "type": "file.only", "source": "/real/videos", "target": "/media", "password": "x" },
                   { "source": "/docs", "target": "/d" }
                 ] } ] }"#,
        );
        let mounts = &config.drives[0].volume_mounts;
        assert!(mounts[0].is_file_only());
        assert_eq!(mounts[0].password.as_deref(), Some("x"));
        assert!(!mounts[1].is_file_only());
    }

    #[test]
    fn test_validation_failures() {
        let config = parse(r#"{ "drives": [] }"#);
        assert!(matches!(config.validate(), Err(ConfigError::NoDrives)));

        let config = parse(r#"{ "drives": [ { "name": "a" }, { "name": "a" } ] }"#);
        assert!(matches!(config.validate(), Err(ConfigError::DuplicateDrive(n)) if n == "a"));

        let config = parse(
            r#"{ "drives": [ { "name": "a", "refreshInterval": 3600, "downloadUrlValidity": 3600 } ] }"#,
        );
        assert!(matches!(config.validate(), Err(ConfigError::RefreshTooLong { .. })));

        let config = parse(r#"{ "drives": [ { "name": "a", "cachingTimeout": 4000 } ] }"#);
        assert!(matches!(config.validate(), Err(ConfigError::CachingTimeoutTooLong { .. })));

        let config = parse(r#"{ "drives": [ { "name": "a", "refreshInterval": 0 } ] }"#);
        assert!(matches!(config.validate(), Err(ConfigError::ZeroRefreshInterval(_))));

        let config = parse(
            r#"{ "drives": [ { "name": "a", "volumeMounts": [ { "source": "/x", "target": "/" } ] } ] }"#,
        );
        assert!(matches!(config.validate(), Err(ConfigError::EmptyMountTarget(_))));
    }

    #[test]
    fn test_token_override() {
        let mut config = parse(
            r#"{ "accessToken": "file", "drives": [ { "name": "a" }, { "name": "b", "accessToken": "own" } ] }"#,
        );
        config.apply_token_override(Some(String::new()));
        assert_eq!(config.access_token_for(&config.drives[0]), "file");
        config.apply_token_override(Some("env".to_string()));
        assert_eq!(config.access_token_for(&config.drives[0]), "env");
        assert_eq!(config.access_token_for(&config.drives[1]), "own");
    }

    #[test]
    fn test_missing_file_writes_template() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TemplateWritten(_)));
        assert!(path.exists());

        // The template itself parses and validates
        let written: Config = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert!(written.validate().is_ok());
    }
}

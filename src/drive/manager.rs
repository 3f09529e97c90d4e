//! Drive Manager - owns the configured drives and their refreshers
//!
//! Each drive gets its own snapshot file, keyed by the remote drive ID, and
//! its own refresher task.

use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::Drive;
use crate::cache::{snapshot_file, CacheStore, DriveDescription, RefresherHandle};
use crate::config::DriveConfig;
use crate::graph::{DriveInfo, ErrorEntry, RemoteFetch};

/// Status of a drive (for the status response)
#[derive(Debug, Clone)]
pub struct DriveStatus {
    pub name: String,
    pub drive_id: String,
    /// Canonical root of the drive
    pub root: String,
    /// Nodes in the store
    pub nodes: usize,
    pub hits: u64,
    pub misses: u64,
    /// Remote connection health
    pub health: &'static str,
    pub recent_errors: Vec<ErrorEntry>,
}

/// Handle to a registered drive
struct DriveHandle<F: RemoteFetch> {
    drive: Arc<Drive<F>>,
    refresh_interval: Duration,
    /// Background refresher, once started
    refresher: Option<RefresherHandle>,
}

/// Build the runtime description of a drive, checking its identity.
///
/// Fails if the config pins a drive ID that the remote does not report.
pub fn describe(config: &DriveConfig, info: &DriveInfo) -> Result<DriveDescription> {
    if let Some(expected) = config.drive_id.as_deref() {
        if expected != info.id {
            return Err(anyhow!(
                "Drive '{}' is configured for drive ID '{}' but the remote reports '{}'",
                config.name,
                expected,
                info.id
            ));
        }
    }

    Ok(DriveDescription {
        name: config.name.clone(),
        root_path: config.root_path.clone(),
        refresh_interval: config.refresh_interval,
        drive_id: info.id.clone(),
        drive_type: config
            .drive_type
            .clone()
            .unwrap_or_else(|| info.drive_type.clone()),
        display_name: config
            .display_name
            .clone()
            .or_else(|| info.name.clone())
            .unwrap_or_else(|| config.name.clone()),
        volume_mounts: config.volume_mounts.clone(),
    })
}

/// Manages the configured drives
pub struct DriveManager<F: RemoteFetch> {
    /// Drives by name
    drives: RwLock<HashMap<String, DriveHandle<F>>>,
    /// Drive used when a request names none (the first one added)
    default_drive: RwLock<Option<String>>,
    snapshot_dir: PathBuf,
    fetch_timeout: Duration,
}

impl<F: RemoteFetch> DriveManager<F> {
    /// Create a drive manager
    ///
    /// # Arguments
    /// * `snapshot_dir` - Directory for `<driveId>.cache.json` snapshots
    /// * `fetch_timeout` - Bound on a single populate
    pub fn new(snapshot_dir: PathBuf, fetch_timeout: Duration) -> Self {
        Self {
            drives: RwLock::new(HashMap::new()),
            default_drive: RwLock::new(None),
            snapshot_dir,
            fetch_timeout,
        }
    }

    /// Register a drive: check its identity against the remote and load its snapshot
    pub async fn add_drive(&self, config: &DriveConfig, remote: Arc<F>) -> Result<()> {
        {
            let drives = self.drives.read().await;
            if drives.contains_key(&config.name) {
                return Err(anyhow!("Drive '{}' is already registered", config.name));
            }
        }

        let info = remote
            .get_drive()
            .await
            .with_context(|| format!("Failed to query remote drive for '{}'", config.name))?;
        let description = describe(config, &info)?;

        {
            let drives = self.drives.read().await;
            if let Some(other) = drives
                .values()
                .find(|h| h.drive.description().drive_id == info.id)
            {
                return Err(anyhow!(
                    "Drives '{}' and '{}' both map to remote drive '{}'; use volume mounts instead",
                    other.drive.name(),
                    config.name,
                    info.id
                ));
            }
        }

        let store = Arc::new(CacheStore::new(snapshot_file(&self.snapshot_dir, &info.id)));
        store.set_drive_description(description.clone());
        store
            .load()
            .with_context(|| format!("Failed to load cache snapshot for '{}'", config.name))?;

        info!(
            drive = %config.name,
            drive_id = %info.id,
            root = %config.root_path,
            nodes = store.len(),
            "Drive registered"
        );

        let drive = Arc::new(Drive::new(
            description,
            config,
            remote,
            store,
            self.fetch_timeout,
        ));
        let handle = DriveHandle {
            drive,
            refresh_interval: config.refresh_interval(),
            refresher: None,
        };

        self.drives.write().await.insert(config.name.clone(), handle);
        let mut default_drive = self.default_drive.write().await;
        if default_drive.is_none() {
            *default_drive = Some(config.name.clone());
        }
        Ok(())
    }

    /// Start a refresher for every drive that does not have one yet
    pub async fn start_refreshers(&self) {
        let mut drives = self.drives.write().await;
        for handle in drives.values_mut() {
            if handle.refresher.is_none() {
                handle.refresher = Some(RefresherHandle::start(
                    Arc::clone(handle.drive.engine()),
                    handle.refresh_interval,
                ));
            }
        }
    }

    /// Look up a drive by name, or the default drive
    pub async fn get(&self, name: Option<&str>) -> Result<Arc<Drive<F>>> {
        let name = match name {
            Some(name) => name.to_string(),
            None => self
                .default_drive
                .read()
                .await
                .clone()
                .ok_or_else(|| anyhow!("No drives registered"))?,
        };

        let drives = self.drives.read().await;
        drives
            .get(&name)
            .map(|h| Arc::clone(&h.drive))
            .ok_or_else(|| anyhow!("Unknown drive '{}'", name))
    }

    /// List all drives, sorted by name
    pub async fn list_drives(&self) -> Vec<DriveStatus> {
        let drives = self.drives.read().await;
        let mut statuses: Vec<DriveStatus> = drives
            .values()
            .map(|h| {
                let engine = h.drive.engine();
                let (hits, misses) = engine.stats();
                DriveStatus {
                    name: h.drive.name().to_string(),
                    drive_id: h.drive.description().drive_id.clone(),
                    root: engine.root().to_string(),
                    nodes: engine.store().len(),
                    hits,
                    misses,
                    health: engine.remote().health_status(),
                    recent_errors: engine.remote().recent_errors(),
                }
            })
            .collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    /// Stop every refresher and save every snapshot
    pub async fn shutdown(&self) {
        let mut drives = self.drives.write().await;
        for handle in drives.values_mut() {
            if let Some(refresher) = handle.refresher.take() {
                refresher.stop().await;
            }
            if let Err(e) = handle.drive.engine().store().save() {
                warn!(drive = %handle.drive.name(), error = %e, "Failed to save cache snapshot");
            }
        }
        info!(drives = drives.len(), "Drives shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::testing::{FakeRemote, DRIVE_ID};

    fn config(name: &str, drive_id: Option<&str>) -> DriveConfig {
        serde_json::from_value(serde_json::json!({
            "name": name,
            "driveId": drive_id,
        }))
        .unwrap()
    }

    #[test]
    fn test_describe_prefers_configured_names() {
        let info = DriveInfo {
            id: "d1".to_string(),
            drive_type: "business".to_string(),
            name: Some("OneDrive".to_string()),
        };
        let mut cfg = config("main", Some("d1"));
        let description = describe(&cfg, &info).unwrap();
        assert_eq!(description.display_name, "OneDrive");
        assert_eq!(description.drive_type, "business");

        cfg.display_name = Some("Media".to_string());
        assert_eq!(describe(&cfg, &info).unwrap().display_name, "Media");
    }

    #[tokio::test]
    async fn test_drive_id_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let manager = DriveManager::new(dir.path().to_path_buf(), Duration::from_secs(5));
        let err = manager
            .add_drive(&config("main", Some("other")), Arc::new(FakeRemote::new()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("other"));
        assert!(manager.get(None).await.is_err());
    }

    #[tokio::test]
    async fn test_first_drive_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let manager = DriveManager::new(dir.path().to_path_buf(), Duration::from_secs(5));
        manager
            .add_drive(&config("main", Some(DRIVE_ID)), Arc::new(FakeRemote::new()))
            .await
            .unwrap();

        assert_eq!(manager.get(None).await.unwrap().name(), "main");
        assert!(manager.get(Some("nope")).await.is_err());
        // Snapshot file is created on first load
        assert!(snapshot_file(dir.path(), DRIVE_ID).exists());

        // A second drive on the same remote drive would share the snapshot
        let err = manager
            .add_drive(&config("second", None), Arc::new(FakeRemote::new()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("volume mounts"));

        let statuses = manager.list_drives().await;
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].drive_id, DRIVE_ID);
        assert_eq!(statuses[0].health, "healthy");
    }

    #[tokio::test]
    async fn test_shutdown_saves_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let manager = DriveManager::new(dir.path().to_path_buf(), Duration::from_secs(5));
        manager
            .add_drive(&config("main", None), Arc::new(FakeRemote::new()))
            .await
            .unwrap();
        manager.start_refreshers().await;

        let drive = manager.get(None).await.unwrap();
        let _ = drive.get_item("/", false);
        manager.shutdown().await;

        let saved = std::fs::read(snapshot_file(dir.path(), DRIVE_ID)).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&saved).unwrap();
        assert_eq!(json["driveDescriptionCache"]["name"], "main");
        assert!(!json["cacheNodes"].as_array().unwrap().is_empty());
    }
}

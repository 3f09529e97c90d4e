//! Path-keyed cache store with a JSON snapshot on disk
//!
//! The node map sits behind a std `RwLock`; no lock is held across an
//! `.await`. Snapshot load/save is serialized by a separate file mutex and
//! writes go through a temp file that is renamed into place.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, RwLock};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::node::{CacheDescription, CacheNode, DriveDescription, Status};

/// On-disk snapshot layout
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    drive_description_cache: Option<DriveDescription>,
    #[serde(default)]
    cache_nodes: Vec<CacheNode>,
}

/// Snapshot file name for a drive
pub fn snapshot_file(dir: &Path, drive_id: &str) -> PathBuf {
    dir.join(format!("{}.cache.json", drive_id))
}

/// In-memory cache of nodes for one drive
pub struct CacheStore {
    nodes: RwLock<HashMap<String, CacheNode>>,
    description: RwLock<Option<DriveDescription>>,
    /// Backing file; `None` keeps the store memory-only
    snapshot_path: Option<PathBuf>,
    file_lock: Mutex<()>,
}

impl CacheStore {
    /// Create a store backed by `snapshot_path`
    pub fn new(snapshot_path: PathBuf) -> Self {
        Self::with_path(Some(snapshot_path))
    }

    /// Create a store that never touches disk
    pub fn in_memory() -> Self {
        Self::with_path(None)
    }

    fn with_path(snapshot_path: Option<PathBuf>) -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            description: RwLock::new(None),
            snapshot_path,
            file_lock: Mutex::new(()),
        }
    }

    /// Exact-match lookup by canonical path
    pub fn find(&self, path: &str) -> Option<CacheNode> {
        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        nodes.get(path).cloned()
    }

    /// Insert or replace the node at its key. Children are replaced, never merged.
    pub fn upsert(&self, node: CacheNode) {
        let key = node.key();
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        nodes.insert(key, node);
    }

    /// Insert only if nothing is stored at the node's key yet
    pub fn insert_if_absent(&self, node: CacheNode) -> bool {
        let key = node.key();
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        if nodes.contains_key(&key) {
            return false;
        }
        nodes.insert(key, node);
        true
    }

    /// Apply a status transition to the node at `path`.
    ///
    /// Returns false if there is no node (or no description) there.
    pub fn update_description<F>(&self, path: &str, f: F) -> bool
    where
        F: FnOnce(&mut CacheDescription),
    {
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        match nodes.get_mut(path).and_then(|n| n.description.as_mut()) {
            Some(description) => {
                f(description);
                true
            }
            None => false,
        }
    }

    /// All stored descriptions, sorted by path
    pub fn descriptions(&self) -> Vec<CacheDescription> {
        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        let mut descriptions: Vec<CacheDescription> =
            nodes.values().filter_map(|n| n.description.clone()).collect();
        descriptions.sort_by(|a, b| a.path.cmp(&b.path));
        descriptions
    }

    pub fn len(&self) -> usize {
        self.nodes.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn set_drive_description(&self, description: DriveDescription) {
        *self.description.write().unwrap_or_else(PoisonError::into_inner) = Some(description);
    }

    pub fn drive_description(&self) -> Option<DriveDescription> {
        self.description
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Serialize every node, sorted by path
    pub fn snapshot(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut cache_nodes: Vec<CacheNode> = {
            let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
            nodes.values().cloned().collect()
        };
        cache_nodes.sort_by_key(|n| n.key());

        let snapshot = Snapshot {
            drive_description_cache: self.drive_description(),
            cache_nodes,
        };
        serde_json::to_vec_pretty(&snapshot)
    }

    /// Replace the contents with a snapshot. Returns the node count.
    ///
    /// Populates that were in flight when the snapshot was taken are gone, so
    /// `Caching` nodes come back as due: `Force` if they had been cached
    /// before, `Wait` otherwise.
    pub fn restore(&self, bytes: &[u8]) -> Result<usize, serde_json::Error> {
        let snapshot: Snapshot = serde_json::from_slice(bytes)?;

        let mut restored = HashMap::with_capacity(snapshot.cache_nodes.len());
        for mut node in snapshot.cache_nodes {
            if let Some(description) = node.description.as_mut() {
                if description.status == Status::Caching {
                    description.status = if description.last_update_at > 0 {
                        Status::Force
                    } else {
                        Status::Wait
                    };
                    description.caching_since = None;
                }
            }
            restored.insert(node.key(), node);
        }
        let count = restored.len();

        *self.nodes.write().unwrap_or_else(PoisonError::into_inner) = restored;
        if let Some(description) = snapshot.drive_description_cache {
            // The running config wins over whatever was saved
            let mut current = self.description.write().unwrap_or_else(PoisonError::into_inner);
            if current.is_none() {
                *current = Some(description);
            }
        }
        Ok(count)
    }

    /// Load the backing file. A missing file yields an empty store and is created.
    pub fn load(&self) -> Result<usize> {
        let Some(path) = self.snapshot_path.as_deref() else {
            return Ok(0);
        };

        let bytes = {
            let _guard = self.file_lock.lock().unwrap_or_else(PoisonError::into_inner);
            if !path.exists() {
                drop(_guard);
                info!(path = %path.display(), "No cache snapshot, starting empty");
                self.save()?;
                return Ok(0);
            }
            fs::read(path)
                .with_context(|| format!("Failed to read cache snapshot: {:?}", path))?
        };

        match self.restore(&bytes) {
            Ok(count) => {
                info!(path = %path.display(), nodes = count, "Loaded cache snapshot");
                Ok(count)
            }
            Err(e) => {
                // A corrupt snapshot only costs a cold start
                warn!(path = %path.display(), error = %e, "Ignoring unreadable cache snapshot");
                Ok(0)
            }
        }
    }

    /// Write the snapshot atomically
    pub fn save(&self) -> Result<()> {
        let Some(path) = self.snapshot_path.as_deref() else {
            return Ok(());
        };

        // Serialize under the file lock so the last writer holds the newest state
        let _guard = self.file_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let bytes = self.snapshot().context("Failed to serialize cache snapshot")?;

        let parent = path.parent().unwrap_or(Path::new("."));
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create snapshot directory: {:?}", parent))?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent)
            .context("Failed to create temp file for snapshot")?;
        tmp.write_all(&bytes).context("Failed to write snapshot")?;
        tmp.persist(path)
            .with_context(|| format!("Failed to persist snapshot: {:?}", path))?;

        debug!(path = %path.display(), bytes = bytes.len(), "Saved cache snapshot");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::node::ItemKind;

    fn cached_folder(path: &str, children: Vec<CacheNode>) -> CacheNode {
        let mut node = CacheNode::placeholder(path, None);
        node.kind = Some(ItemKind::Folder {
            child_count: children.len() as u64,
        });
        node.children = Some(children);
        if let Some(d) = node.description.as_mut() {
            d.status = Status::Cached;
            d.last_update_at = 100;
        }
        node
    }

    #[test]
    fn test_upsert_replaces_without_merging() {
        let store = CacheStore::in_memory();
        let child = CacheNode::placeholder("/drive/root:/a/x", None);
        store.upsert(cached_folder("/drive/root:/a", vec![child]));
        store.upsert(cached_folder("/drive/root:/a", vec![]));

        let found = store.find("/drive/root:/a").unwrap();
        assert_eq!(found.children, Some(Vec::new()));
        assert_eq!(store.len(), 1);
        assert!(store.find("/drive/root:/a/").is_none());
    }

    #[test]
    fn test_update_description() {
        let store = CacheStore::in_memory();
        store.upsert(CacheNode::placeholder("/drive/root:", None));
        assert!(store.update_description("/drive/root:", |d| d.status = Status::Caching));
        assert_eq!(store.find("/drive/root:").unwrap().status(), Some(Status::Caching));
        assert!(!store.update_description("/drive/root:/nope", |d| d.status = Status::Cached));
    }

    #[test]
    fn test_insert_if_absent() {
        let store = CacheStore::in_memory();
        assert!(store.insert_if_absent(cached_folder("/drive/root:", vec![])));
        assert!(!store.insert_if_absent(CacheNode::placeholder("/drive/root:", None)));
        assert_eq!(store.find("/drive/root:").unwrap().status(), Some(Status::Cached));
    }

    #[test]
    fn test_missing_snapshot_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = snapshot_file(dir.path(), "drive-1");
        let store = CacheStore::new(path.clone());

        assert_eq!(store.load().unwrap(), 0);
        assert!(path.exists());
        assert!(store.is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = snapshot_file(dir.path(), "drive-1");

        let store = CacheStore::new(path.clone());
        store.upsert(cached_folder("/drive/root:", vec![]));
        let mut in_flight = cached_folder("/drive/root:/b", vec![]);
        if let Some(d) = in_flight.description.as_mut() {
            d.status = Status::Caching;
            d.caching_since = Some(150);
        }
        store.upsert(in_flight);
        store.upsert(CacheNode::placeholder("/drive/root:/c", None));
        store.save().unwrap();

        let json: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(json["cacheNodes"].as_array().unwrap().len(), 3);

        let reloaded = CacheStore::new(path);
        assert_eq!(reloaded.load().unwrap(), 3);
        assert_eq!(
            reloaded.find("/drive/root:").unwrap().children,
            Some(Vec::new())
        );
        // In-flight populates do not survive a restart
        let b = reloaded.find("/drive/root:/b").unwrap();
        assert_eq!(b.status(), Some(Status::Force));
        assert_eq!(b.description.unwrap().caching_since, None);
        assert_eq!(
            reloaded.find("/drive/root:/c").unwrap().status(),
            Some(Status::Wait)
        );
    }

    #[test]
    fn test_concurrent_saves_keep_newest_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = snapshot_file(dir.path(), "drive-1");
        let store = CacheStore::new(path.clone());

        for round in 0..20 {
            std::thread::scope(|scope| {
                for i in 0..4 {
                    let store = &store;
                    scope.spawn(move || {
                        let key = format!("/drive/root:/r{}-{}", round, i);
                        store.upsert(cached_folder(&key, vec![]));
                        store.save().unwrap();
                    });
                }
            });

            // Every writer upserted before saving, so the last file written has them all
            let json: serde_json::Value =
                serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
            assert_eq!(json["cacheNodes"].as_array().unwrap().len(), store.len());
        }
    }

    #[test]
    fn test_corrupt_snapshot_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = snapshot_file(dir.path(), "drive-1");
        fs::write(&path, b"not json").unwrap();

        let store = CacheStore::new(path);
        assert_eq!(store.load().unwrap(), 0);
    }
}

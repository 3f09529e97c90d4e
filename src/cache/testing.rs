//! In-memory drive used by the cache, drive and socket tests

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde_json::json;

use crate::drive::path::split;
use crate::graph::{DriveInfo, DriveItem, DriveItemPage, GraphError, RemoteFetch, DRIVE_ROOT};

pub const DRIVE_ID: &str = "drive-1";

/// Remote file item under `parent`
pub fn file(parent: &str, name: &str) -> DriveItem {
    serde_json::from_value(json!({
        "id": format!("id:{}/{}", parent, name),
        "name": name,
        "eTag": "etag-1",
        "size": 42,
        "createdDateTime": "2020-03-01T10:00:00Z",
        "lastModifiedDateTime": "2020-03-02T10:00:00Z",
        "parentReference": { "driveId": DRIVE_ID, "driveType": "personal", "path": parent },
        "file": { "mimeType": "text/plain", "hashes": { "quickXorHash": "qx" } },
        "@microsoft.graph.downloadUrl": format!("https://dl.invalid{}/{}", parent, name)
    }))
    .expect("valid file item")
}

/// Remote folder item under `parent`
pub fn folder(parent: &str, name: &str, child_count: u64) -> DriveItem {
    serde_json::from_value(json!({
        "id": format!("id:{}/{}", parent, name),
        "name": name,
        "parentReference": { "driveId": DRIVE_ID, "driveType": "personal", "path": parent },
        "folder": { "childCount": child_count }
    }))
    .expect("valid folder item")
}

/// Remote root item
pub fn root(child_count: u64) -> DriveItem {
    serde_json::from_value(json!({
        "id": "id:root",
        "name": "root",
        "parentReference": { "driveId": DRIVE_ID, "driveType": "personal" },
        "folder": { "childCount": child_count }
    }))
    .expect("valid root item")
}

#[derive(Default)]
pub struct FakeRemote {
    items: Mutex<HashMap<String, DriveItem>>,
    pages: Mutex<HashMap<String, Vec<Vec<DriveItem>>>>,
    failing: Mutex<HashSet<String>>,
    item_calls: Mutex<HashMap<String, usize>>,
    children_calls: AtomicUsize,
    delay: Mutex<Option<Duration>>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_item(&self, path: &str, item: DriveItem) {
        self.items.lock().unwrap().insert(path.to_string(), item);
    }

    /// Folder at `path` whose listing comes back as `pages`
    pub fn insert_paged_folder(&self, path: &str, pages: Vec<Vec<DriveItem>>) {
        let count = pages.iter().map(|p| p.len()).sum::<usize>() as u64;
        let item = if path == DRIVE_ROOT {
            root(count)
        } else {
            let (parent, name) = split(path);
            folder(parent, name, count)
        };
        self.insert_item(path, item);
        self.pages.lock().unwrap().insert(path.to_string(), pages);
    }

    /// Folder at `path` listed in a single page
    pub fn insert_folder(&self, path: &str, children: Vec<DriveItem>) {
        self.insert_paged_folder(path, vec![children]);
    }

    pub fn fail(&self, path: &str) {
        self.failing.lock().unwrap().insert(path.to_string());
    }

    pub fn heal(&self, path: &str) {
        self.failing.lock().unwrap().remove(path);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn item_calls(&self, path: &str) -> usize {
        self.item_calls.lock().unwrap().get(path).copied().unwrap_or(0)
    }

    pub fn children_calls(&self) -> usize {
        self.children_calls.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

impl RemoteFetch for FakeRemote {
    async fn get_drive(&self) -> Result<DriveInfo, GraphError> {
        Ok(DriveInfo {
            id: DRIVE_ID.to_string(),
            drive_type: "personal".to_string(),
            name: Some("OneDrive".to_string()),
        })
    }

    async fn get_item(&self, path: &str) -> Result<DriveItem, GraphError> {
        *self
            .item_calls
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_insert(0) += 1;
        self.pause().await;

        if self.failing.lock().unwrap().contains(path) {
            return Err(GraphError::Server(503, "unavailable".to_string()));
        }
        self.items
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| GraphError::NotFound(path.to_string()))
    }

    async fn get_children(
        &self,
        path: &str,
        continuation: Option<&str>,
    ) -> Result<DriveItemPage, GraphError> {
        self.children_calls.fetch_add(1, Ordering::SeqCst);

        let index = match continuation {
            Some(link) => link
                .rsplit_once("page=")
                .and_then(|(_, n)| n.parse::<usize>().ok())
                .ok_or_else(|| GraphError::Request(format!("bad continuation {}", link)))?,
            None => 0,
        };

        let pages = self.pages.lock().unwrap();
        let listing = pages.get(path).cloned().unwrap_or_default();
        let items = listing.get(index).cloned().unwrap_or_default();
        let next_link = (index + 1 < listing.len())
            .then(|| format!("https://graph.invalid/children?path={}&page={}", path, index + 1));
        Ok(DriveItemPage { items, next_link })
    }
}

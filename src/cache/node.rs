//! Cache node data model
//!
//! A `CacheNode` mirrors one remote item. Top-level nodes in the store carry a
//! `CacheDescription` with their freshness; children embedded in an expanded
//! folder do not.

use serde::{Deserialize, Serialize};

use crate::config::VolumeMount;
use crate::graph::{DriveItem, ItemReference, DRIVE_ROOT};

/// Refresh state of a cached node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    /// Placeholder, never populated
    Wait,
    /// Populate in flight
    Caching,
    Cached,
    /// Last populate failed; `last_update_at` is from the last success
    Failed,
    /// Operator asked for a refresh
    Force,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Wait => "Wait",
            Status::Caching => "Caching",
            Status::Cached => "Cached",
            Status::Failed => "Failed",
            Status::Force => "Force",
        }
    }
}

/// Freshness record for a top-level node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheDescription {
    /// Canonical path, the store key
    pub path: String,
    #[serde(default)]
    pub request_url: String,
    /// Epoch seconds of the last successful populate
    #[serde(default)]
    pub last_update_at: i64,
    pub status: Status,
    /// Epoch seconds when the node entered `Caching`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caching_since: Option<i64>,
}

impl CacheDescription {
    pub fn new(path: &str, status: Status, last_update_at: i64) -> Self {
        Self {
            path: path.to_string(),
            request_url: path.to_string(),
            last_update_at,
            status,
            caching_since: None,
        }
    }
}

/// File or folder facet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ItemKind {
    File {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content_hash: Option<String>,
    },
    Folder {
        child_count: u64,
    },
}

/// Resolved description of a configured drive, persisted with the snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveDescription {
    pub name: String,
    /// Drive-relative root, empty for the whole drive
    #[serde(default)]
    pub root_path: String,
    pub refresh_interval: u64,
    pub drive_id: String,
    #[serde(default)]
    pub drive_type: String,
    /// Name served for the root folder
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub volume_mounts: Vec<VolumeMount>,
}

/// One remote item, keyed in the store by canonical path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<CacheDescription>,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub etag: String,
    #[serde(default)]
    pub name: String,
    /// `None` for placeholders
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ItemKind>,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub last_modified_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_reference: Option<ItemReference>,
    /// `None` until the folder has been expanded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<CacheNode>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_url: Option<String>,
}

impl CacheNode {
    /// `Wait` placeholder at `path`
    pub fn placeholder(path: &str, parent_reference: Option<ItemReference>) -> Self {
        let (_, name) = crate::drive::path::split(path);
        Self {
            description: Some(CacheDescription::new(path, Status::Wait, 0)),
            id: String::new(),
            etag: String::new(),
            name: name.to_string(),
            kind: None,
            size: 0,
            created_at: 0,
            last_modified_at: 0,
            parent_reference,
            children: None,
            download_url: None,
            web_url: None,
        }
    }

    /// Convert a fetched item. The result has no description and no children.
    pub fn from_remote(item: DriveItem) -> Self {
        let created_at = item.created_at();
        let last_modified_at = item.last_modified_at();
        let etag = item.tag();

        let kind = match (&item.file, &item.folder) {
            (Some(file), _) => Some(ItemKind::File {
                mime_type: file.mime_type.clone(),
                content_hash: file.content_hash(),
            }),
            (None, Some(folder)) => Some(ItemKind::Folder {
                child_count: folder.child_count,
            }),
            (None, None) => None,
        };

        // Parent paths come back percent-encoded; keys are stored decoded
        let parent_reference = item.parent_reference.map(|mut parent| {
            parent.path = parent.path.map(|p| match urlencoding::decode(&p) {
                Ok(decoded) => decoded.into_owned(),
                Err(_) => p,
            });
            parent
        });

        Self {
            description: None,
            id: item.id,
            etag,
            name: item.name,
            kind,
            size: item.size,
            created_at,
            last_modified_at,
            parent_reference,
            children: None,
            download_url: item.download_url,
            web_url: item.web_url,
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self.kind, Some(ItemKind::File { .. }))
    }

    pub fn is_folder(&self) -> bool {
        matches!(self.kind, Some(ItemKind::Folder { .. }))
    }

    pub fn is_placeholder(&self) -> bool {
        self.kind.is_none()
    }

    /// Remote child count; zero for files and placeholders
    pub fn child_count(&self) -> u64 {
        match self.kind {
            Some(ItemKind::Folder { child_count }) => child_count,
            _ => 0,
        }
    }

    pub fn is_expanded(&self) -> bool {
        self.children.is_some()
    }

    pub fn find_child(&self, name: &str) -> Option<&CacheNode> {
        self.children.as_ref()?.iter().find(|c| c.name == name)
    }

    pub fn status(&self) -> Option<Status> {
        self.description.as_ref().map(|d| d.status)
    }

    /// Canonical path derived from the parent reference
    pub fn canonical_path(&self) -> String {
        match self.parent_reference.as_ref().and_then(|p| p.path.as_deref()) {
            Some(parent) => format!("{}/{}", parent.trim_end_matches('/'), self.name),
            None => DRIVE_ROOT.to_string(),
        }
    }

    /// Store key: the description path when present
    pub fn key(&self) -> String {
        match &self.description {
            Some(d) => d.path.clone(),
            None => self.canonical_path(),
        }
    }
}

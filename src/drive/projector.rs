//! Payload Projector
//!
//! Turns a cache node into what clients see: user-facing paths (with any
//! volume mount mapped back), the drive's display name for the root and a
//! download path per file child.

use serde::{Deserialize, Serialize};

use super::path::PathResolver;
use crate::cache::{CacheNode, ItemKind};
use crate::config::VolumeMount;

/// One entry of a folder listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildPayload {
    pub name: String,
    pub path: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub last_modified_at: i64,
    /// Set for files only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_path: Option<String>,
}

/// Served representation of a file or folder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemPayload {
    pub path: String,
    pub name: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    pub created_at: i64,
    pub last_modified_at: i64,
    pub last_update_at: i64,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<ChildPayload>>,
}

fn child_path(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent, name)
    }
}

/// Canonical path of a node as the remote reports it
fn remote_path(node: &CacheNode) -> String {
    let from_child = node
        .children
        .as_ref()
        .and_then(|children| children.first())
        .and_then(|child| child.parent_reference.as_ref())
        .and_then(|parent| parent.path.clone());
    from_child.unwrap_or_else(|| node.canonical_path())
}

pub fn project(
    node: &CacheNode,
    resolver: &PathResolver,
    display_name: &str,
    mount: Option<&VolumeMount>,
) -> ItemPayload {
    let mut relative = resolver.to_relative(&remote_path(node));
    if let Some(mount) = mount {
        relative = resolver.unmount(&relative, mount);
    }

    let name = if relative == "/" {
        display_name.to_string()
    } else {
        node.name.clone()
    };

    let (mime_type, content_hash, child_count) = match &node.kind {
        Some(ItemKind::File {
            mime_type,
            content_hash,
        }) => (mime_type.clone(), content_hash.clone(), None),
        Some(ItemKind::Folder { child_count }) => (None, None, Some(*child_count)),
        None => (None, None, None),
    };

    let children = node.children.as_ref().map(|children| {
        children
            .iter()
            .map(|child| {
                let path = child_path(&relative, &child.name);
                ChildPayload {
                    name: child.name.clone(),
                    download_path: child.is_file().then(|| path.clone()),
                    path,
                    size: child.size,
                    child_count: child.is_folder().then(|| child.child_count()),
                    mime_type: match &child.kind {
                        Some(ItemKind::File { mime_type, .. }) => mime_type.clone(),
                        _ => None,
                    },
                    last_modified_at: child.last_modified_at,
                }
            })
            .collect()
    });

    let (last_update_at, status) = match &node.description {
        Some(d) => (d.last_update_at, d.status.as_str().to_string()),
        None => (0, String::new()),
    };

    ItemPayload {
        path: relative,
        name,
        size: node.size,
        child_count,
        mime_type,
        content_hash,
        created_at: node.created_at,
        last_modified_at: node.last_modified_at,
        last_update_at,
        status,
        children,
    }
}

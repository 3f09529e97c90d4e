//! Drive API types
//!
//! Defines the wire types for drive item responses. Only the fields the cache
//! needs are modelled; everything else in the payload is ignored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Deserialize a number that might be encoded as a string or null.
/// Some drive backends return `size` as a string for very large files
/// and null for packages.
fn deserialize_flexible_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de;

    struct FlexibleU64Visitor;

    impl<'de> de::Visitor<'de> for FlexibleU64Visitor {
        type Value = u64;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a u64, a string containing a u64, or null")
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<u64, E> {
            Ok(value)
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<u64, E> {
            u64::try_from(value).map_err(|_| de::Error::custom("negative value for u64"))
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<u64, E> {
            value.parse::<u64>().map_err(de::Error::custom)
        }

        fn visit_none<E: de::Error>(self) -> Result<u64, E> {
            Ok(0)
        }

        fn visit_unit<E: de::Error>(self) -> Result<u64, E> {
            Ok(0)
        }
    }

    deserializer.deserialize_any(FlexibleU64Visitor)
}

/// Drive metadata from `GET /me/drive`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DriveInfo {
    /// Drive ID, also used to name the snapshot file
    pub id: String,
    /// personal, business or documentLibrary
    #[serde(default)]
    pub drive_type: String,
    /// Drive display name as reported by the store
    #[serde(default)]
    pub name: Option<String>,
}

/// Reference to the folder containing an item
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ItemReference {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub drive_id: String,
    #[serde(default)]
    pub drive_type: String,
    /// Parent path in `/drive/root:/...` form; absent for the root item
    #[serde(default)]
    pub path: Option<String>,
}

/// Content hashes reported for a file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hashes {
    #[serde(default)]
    pub quick_xor_hash: Option<String>,
    #[serde(default)]
    pub sha1_hash: Option<String>,
    #[serde(default)]
    pub sha256_hash: Option<String>,
}

/// File facet
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileFacet {
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub hashes: Option<Hashes>,
}

impl FileFacet {
    /// Best available content hash, preferring quickXor like the store does
    pub fn content_hash(&self) -> Option<String> {
        let hashes = self.hashes.as_ref()?;
        hashes
            .quick_xor_hash
            .clone()
            .or_else(|| hashes.sha1_hash.clone())
            .or_else(|| hashes.sha256_hash.clone())
    }
}

/// Folder facet
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderFacet {
    #[serde(default)]
    pub child_count: u64,
}

/// A single file or folder from the drive API
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveItem {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub e_tag: Option<String>,
    #[serde(default)]
    pub c_tag: Option<String>,
    #[serde(default, deserialize_with = "deserialize_flexible_u64")]
    pub size: u64,
    #[serde(default)]
    pub created_date_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_modified_date_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub web_url: Option<String>,
    #[serde(default)]
    pub parent_reference: Option<ItemReference>,
    #[serde(default)]
    pub file: Option<FileFacet>,
    #[serde(default)]
    pub folder: Option<FolderFacet>,
    /// Pre-authenticated, short-lived content URL (files only)
    #[serde(default, rename = "@microsoft.graph.downloadUrl")]
    pub download_url: Option<String>,
}

impl DriveItem {
    /// Concurrency tag, preferring the content tag when both are present
    pub fn tag(&self) -> String {
        self.c_tag
            .clone()
            .or_else(|| self.e_tag.clone())
            .unwrap_or_default()
    }

    /// Creation time in epoch seconds (0 when unknown)
    pub fn created_at(&self) -> i64 {
        self.created_date_time.map(|t| t.timestamp()).unwrap_or(0)
    }

    /// Last modification time in epoch seconds (0 when unknown)
    pub fn last_modified_at(&self) -> i64 {
        self.last_modified_date_time
            .map(|t| t.timestamp())
            .unwrap_or(0)
    }
}

/// One page of a folder listing
#[derive(Debug, Clone, Deserialize)]
pub struct DriveItemPage {
    #[serde(default, rename = "value")]
    pub items: Vec<DriveItem>,
    /// Continuation link; absent on the last page
    #[serde(default, rename = "@odata.nextLink")]
    pub next_link: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_file_item() {
        let json = r#"{
            "id": "01ABC",
            "name": "ep1.mkv",
            "eTag": "\"{E1},1\"",
            "cTag": "\"c:{E1},2\"",
            "size": 734003200,
            "createdDateTime": "2020-03-01T10:00:00Z",
            "lastModifiedDateTime": "2020-03-02T10:00:00Z",
            "webUrl": "https://example.invalid/ep1.mkv",
            "parentReference": {
                "driveId": "b!drive",
                "driveType": "business",
                "id": "01PARENT",
                "path": "/drive/root:/real/videos/show"
            },
            "file": {
                "mimeType": "video/x-matroska",
                "hashes": { "quickXorHash": "qx==" }
            },
            "@microsoft.graph.downloadUrl": "https://download.invalid/ep1?sig=1"
        }"#;
        let item: DriveItem = serde_json::from_str(json).unwrap();
        assert_eq!(item.name, "ep1.mkv");
        assert_eq!(item.size, 734003200);
        assert_eq!(item.tag(), "\"c:{E1},2\"");
        assert_eq!(item.created_at(), 1583056800);
        assert_eq!(item.file.as_ref().unwrap().content_hash().as_deref(), Some("qx=="));
        assert!(item.folder.is_none());
        assert_eq!(
            item.parent_reference.unwrap().path.as_deref(),
            Some("/drive/root:/real/videos/show")
        );
        assert_eq!(item.download_url.as_deref(), Some("https://download.invalid/ep1?sig=1"));
    }

    #[test]
    fn test_deserialize_root_folder() {
        // The root item has a parent reference without a path
        let json = r#"{
            "id": "01ROOT",
            "name": "root",
            "size": "1024",
            "parentReference": { "driveId": "b!drive", "driveType": "personal" },
            "folder": { "childCount": 3 },
            "root": {}
        }"#;
        let item: DriveItem = serde_json::from_str(json).unwrap();
        assert_eq!(item.size, 1024);
        assert_eq!(item.created_at(), 0);
        assert_eq!(item.folder.as_ref().unwrap().child_count, 3);
        assert_eq!(item.parent_reference.as_ref().unwrap().path, None);
    }

    #[test]
    fn test_deserialize_page_with_next_link() {
        let json = r#"{
            "value": [
                { "id": "1", "name": "a", "folder": { "childCount": 0 } },
                { "id": "2", "name": "b.txt", "file": { "mimeType": "text/plain" } }
            ],
            "@odata.nextLink": "https://graph.invalid/next?$skiptoken=abc"
        }"#;
        let page: DriveItemPage = serde_json::from_str(json).unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(
            page.next_link.as_deref(),
            Some("https://graph.invalid/next?$skiptoken=abc")
        );
    }

    #[test]
    fn test_deserialize_last_page() {
        let page: DriveItemPage = serde_json::from_str(r#"{ "value": [] }"#).unwrap();
        assert!(page.items.is_empty());
        assert!(page.next_link.is_none());
    }
}

//! IPC protocol definitions
//!
//! Newline-delimited JSON exchanged with clients over the Unix domain socket.
//! Every message is an object tagged by `type`.

use serde::{Deserialize, Serialize};

use crate::drive::projector::ItemPayload;

/// Protocol version for future compatibility
pub const PROTOCOL_VERSION: u32 = 1;

/// Commands sent by clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Command {
    /// Project a file or folder
    #[serde(rename_all = "camelCase")]
    GetItem {
        /// Drive name, the default drive if omitted
        #[serde(default)]
        drive: Option<String>,
        path: String,
        /// Mark the path for refresh before answering
        #[serde(default)]
        force: bool,
    },
    /// Resolve a file's download URL, populating on miss
    #[serde(rename_all = "camelCase")]
    GetContent {
        #[serde(default)]
        drive: Option<String>,
        path: String,
    },
    /// Mark a path and its parent for the next refresh sweep
    #[serde(rename_all = "camelCase")]
    ForceRefresh {
        #[serde(default)]
        drive: Option<String>,
        path: String,
    },
    /// Get daemon status and list of drives
    GetStatus,
}

/// Responses sent back to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Response {
    /// Projected item
    #[serde(rename_all = "camelCase")]
    Item { item: ItemPayload },
    /// Go fetch the content here
    #[serde(rename_all = "camelCase")]
    Redirect { location: String },
    /// Not in the cache (yet) or not servable through this path
    #[serde(rename_all = "camelCase")]
    NotFound { error: String },
    /// Error response
    #[serde(rename_all = "camelCase")]
    Error { error: String },
    /// Success response
    #[serde(rename_all = "camelCase")]
    Success {
        /// Optional success message
        message: Option<String>,
    },
    /// Status response with daemon state
    #[serde(rename_all = "camelCase")]
    Status {
        /// Protocol version
        version: u32,
        /// Whether every drive's remote is healthy
        healthy: bool,
        drives: Vec<DriveSummary>,
    },
}

/// Information about a configured drive (for status response)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveSummary {
    pub name: String,
    pub drive_id: String,
    pub root: String,
    /// Cached nodes
    pub nodes: usize,
    pub hits: u64,
    pub misses: u64,
    pub health: String,
    #[serde(default)]
    pub recent_errors: Vec<UpstreamError>,
}

/// A recent remote failure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamError {
    pub timestamp: u64,
    pub operation: String,
    pub path: String,
    pub error: String,
}

/// Parse a JSON command from bytes
pub fn parse_command(data: &[u8]) -> Result<Command, serde_json::Error> {
    serde_json::from_slice(data)
}

/// Serialize a response to JSON bytes
pub fn serialize_response(response: &Response) -> Result<Vec<u8>, serde_json::Error> {
    let mut json = serde_json::to_vec(response)?;
    json.push(b'\n'); // Add newline delimiter
    Ok(json)
}

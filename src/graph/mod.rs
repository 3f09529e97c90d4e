//! Remote drive API access

pub mod client;
pub mod errors;
pub mod types;

use std::future::Future;

pub use client::{ErrorEntry, GraphClient, DRIVE_ROOT};
pub use errors::GraphError;
pub use types::*;

/// Read-only view of the remote drive that the cache populates from.
///
/// Paths are canonical (`/drive/root:/...`). `get_children` returns one page;
/// pass the previous page's `next_link` back as `continuation` to get the next.
pub trait RemoteFetch: Send + Sync + 'static {
    fn get_drive(&self) -> impl Future<Output = Result<DriveInfo, GraphError>> + Send;

    fn get_item(&self, path: &str) -> impl Future<Output = Result<DriveItem, GraphError>> + Send;

    fn get_children(
        &self,
        path: &str,
        continuation: Option<&str>,
    ) -> impl Future<Output = Result<DriveItemPage, GraphError>> + Send;

    /// Connection health for status reporting
    fn health_status(&self) -> &'static str {
        "healthy"
    }

    /// Most recent upstream failures, oldest first
    fn recent_errors(&self) -> Vec<ErrorEntry> {
        Vec::new()
    }
}

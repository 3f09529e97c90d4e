//! Path-keyed drive cache
//!
//! Mirrors the remote tree into a `CacheStore`, resolves lookups against it
//! and keeps it fresh from a background refresher.

pub mod engine;
pub mod node;
pub mod refresher;
pub mod staleness;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::CacheEngine;
pub use node::{CacheDescription, CacheNode, DriveDescription, ItemKind, Status};
pub use refresher::{force_refresh, sweep, RefresherHandle, SweepReport};
pub use staleness::StalenessPolicy;
pub use store::{snapshot_file, CacheStore};

/// Lookup and populate failures
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CacheError {
    #[error("Cache miss for {path}")]
    CacheMiss { path: String },

    #[error("Cache expired for {path}")]
    CacheExpired { path: String },

    #[error("Upstream failed for {path}: {reason}")]
    UpstreamFailed { path: String, reason: String },

    #[error("{path} is not a file")]
    MountTypeViolation { path: String },

    #[error("Listing {path} exceeded {pages} pages")]
    PaginationExhausted { path: String, pages: usize },

    #[error("No such item: {path}")]
    NotFound { path: String },
}

impl CacheError {
    /// Path a background refresh should target, for recoverable errors
    pub fn refresh_target(&self) -> Option<&str> {
        match self {
            CacheError::CacheMiss { path }
            | CacheError::CacheExpired { path }
            | CacheError::UpstreamFailed { path, .. } => Some(path),
            _ => None,
        }
    }
}

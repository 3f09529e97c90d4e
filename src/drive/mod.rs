//! Configured drives
//!
//! A `Drive` ties one configured subtree to its cache: it canonicalizes the
//! requested path, resolves it, kicks off background population on misses
//! and projects the result.

pub mod manager;
pub mod path;
pub mod projector;

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::cache::{
    force_refresh, CacheEngine, CacheError, CacheNode, CacheStore, DriveDescription,
    StalenessPolicy,
};
use crate::config::DriveConfig;
use crate::graph::RemoteFetch;
use path::{PathResolver, ResolvedPath};
use projector::ItemPayload;

pub use manager::DriveManager;

pub struct Drive<F: RemoteFetch> {
    description: DriveDescription,
    resolver: PathResolver,
    engine: Arc<CacheEngine<F>>,
}

impl<F: RemoteFetch> Drive<F> {
    pub fn new(
        description: DriveDescription,
        config: &DriveConfig,
        remote: Arc<F>,
        store: Arc<CacheStore>,
        fetch_timeout: Duration,
    ) -> Self {
        let resolver = PathResolver::new(&description.root_path, &description.volume_mounts);
        let policy = StalenessPolicy::new(
            config.download_url_validity(),
            config.refresh_interval(),
            config.caching_timeout(),
        );
        let engine = Arc::new(CacheEngine::new(
            remote,
            store,
            policy,
            resolver.root(),
            fetch_timeout,
        ));

        Self {
            description,
            resolver,
            engine,
        }
    }

    pub fn name(&self) -> &str {
        &self.description.name
    }

    pub fn description(&self) -> &DriveDescription {
        &self.description
    }

    pub fn engine(&self) -> &Arc<CacheEngine<F>> {
        &self.engine
    }

    /// Project a requested path.
    ///
    /// A recoverable miss starts a background refresh and is returned as is;
    /// the caller answers not-ready. `force` marks the path for the next sweep.
    pub fn get_item(&self, requested: &str, force: bool) -> Result<ItemPayload, CacheError> {
        let resolved = self.resolver.resolve(requested);
        if force {
            force_refresh(&*self.engine, &resolved.canonical);
        }

        let node = self.resolve_or_refresh(&resolved)?;
        Ok(projector::project(
            &node,
            &self.resolver,
            &self.description.display_name,
            resolved.mount.as_ref(),
        ))
    }

    /// Download URL for a requested file, populating the cache as needed.
    ///
    /// Each populate moves the lookup at least one level deeper, so the loop
    /// is bounded by the path depth.
    pub async fn content_url(&self, requested: &str) -> Result<String, CacheError> {
        let resolved = self.resolver.resolve(requested);
        let depth = resolved
            .canonical
            .strip_prefix(self.resolver.root())
            .unwrap_or(&resolved.canonical)
            .matches('/')
            .count();

        for _ in 0..=depth + 1 {
            match self.lookup(&resolved) {
                Ok(node) => {
                    let url = if node.is_file() { node.download_url } else { None };
                    return url.ok_or_else(|| CacheError::NotFound {
                        path: resolved.relative.clone(),
                    });
                }
                Err(e) => match e.refresh_target() {
                    Some(target) => {
                        debug!(path = %resolved.canonical, refresh = %target, "Populating for content");
                        self.engine.refresh(target).await?;
                    }
                    None => return Err(e),
                },
            }
        }

        Err(CacheError::CacheMiss {
            path: resolved.canonical,
        })
    }

    /// Resolve and enforce the mount's file-only rule
    fn lookup(&self, resolved: &ResolvedPath) -> Result<CacheNode, CacheError> {
        let node = self.engine.resolve(&resolved.canonical)?;
        match &resolved.mount {
            Some(mount) if mount.is_file_only() && !node.is_file() => {
                Err(CacheError::MountTypeViolation {
                    path: resolved.relative.clone(),
                })
            }
            _ => Ok(node),
        }
    }

    fn resolve_or_refresh(&self, resolved: &ResolvedPath) -> Result<CacheNode, CacheError> {
        self.lookup(resolved).map_err(|e| {
            if let Some(target) = e.refresh_target() {
                self.engine.spawn_refresh(target.to_string());
            }
            e
        })
    }

    /// Mark a requested path and its parent for refresh
    pub fn force_refresh(&self, requested: &str) -> usize {
        let resolved = self.resolver.resolve(requested);
        force_refresh(&*self.engine, &resolved.canonical)
    }
}

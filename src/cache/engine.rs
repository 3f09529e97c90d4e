//! Cache Resolution Engine
//!
//! `resolve` answers from the store without touching the network. On a miss
//! it leaves a `Wait` placeholder at the deepest level it could reach and
//! reports which path needs populating; `refresh` does the populating.
//!
//! Concurrent refreshes of one path share a single populate through the
//! moka future cache's `try_get_with` coalescing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::node::{CacheDescription, CacheNode, Status};
use super::staleness::StalenessPolicy;
use super::store::CacheStore;
use super::CacheError;
use crate::drive::path::split;
use crate::graph::RemoteFetch;

/// Upper bound on children pages fetched for one folder
pub const MAX_CHILDREN_PAGES: usize = 1000;

/// Default bound on a single populate (item plus all children pages)
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(120);

/// Current time in epoch seconds
pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

pub struct CacheEngine<F: RemoteFetch> {
    remote: Arc<F>,
    store: Arc<CacheStore>,
    policy: StalenessPolicy,
    /// Canonical path of the drive root
    root: String,
    fetch_timeout: Duration,
    /// In-flight populates by canonical path
    inflight: Cache<String, CacheNode>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<F: RemoteFetch> CacheEngine<F> {
    pub fn new(
        remote: Arc<F>,
        store: Arc<CacheStore>,
        policy: StalenessPolicy,
        root: &str,
        fetch_timeout: Duration,
    ) -> Self {
        let inflight = Cache::builder()
            .name("inflight_populates")
            .max_capacity(1024)
            .build();

        Self {
            remote,
            store,
            policy,
            root: root.to_string(),
            fetch_timeout,
            inflight,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub fn remote(&self) -> &Arc<F> {
        &self.remote
    }

    pub fn policy(&self) -> &StalenessPolicy {
        &self.policy
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Look up `path` at the current time
    pub fn resolve(&self, path: &str) -> Result<CacheNode, CacheError> {
        self.resolve_at(path, now())
    }

    /// Look up `path` as of `now` (epoch seconds)
    pub fn resolve_at(&self, path: &str, now: i64) -> Result<CacheNode, CacheError> {
        // Direct hit on a stored node
        if let Some(node) = self.store.find(path) {
            if let Some(description) = &node.description {
                if let Err(e) = self.policy.check_servable(description, now) {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    trace!(path = %path, error = %e, "Stored node not servable");
                    return Err(e);
                }
            }
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(path = %path, "Cache HIT");
            return Ok(node);
        }

        let (parent_path, leaf) = split(path);
        if path == self.root || leaf.is_empty() {
            return Err(self.miss_with_placeholder(CacheNode::placeholder(path, None)));
        }

        // Files and expanded folders only live inside their parent
        let parent = self.resolve_at(parent_path, now)?;
        let child = match (parent.is_expanded(), parent.find_child(leaf)) {
            (true, Some(child)) => child,
            _ => {
                debug!(path = %path, parent = %parent_path, "No such child");
                return Err(CacheError::NotFound {
                    path: path.to_string(),
                });
            }
        };

        if child.is_file() || child.child_count() == 0 {
            let mut node = child.clone();
            if node.is_folder() {
                node.children = Some(Vec::new());
            }
            node.description = parent.description.as_ref().map(|d| CacheDescription {
                path: path.to_string(),
                request_url: path.to_string(),
                last_update_at: d.last_update_at,
                status: d.status,
                caching_since: None,
            });
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(path = %path, "Cache HIT via parent");
            return Ok(node);
        }

        Err(self.miss_with_placeholder(CacheNode::placeholder(
            path,
            child.parent_reference.clone(),
        )))
    }

    fn miss_with_placeholder(&self, placeholder: CacheNode) -> CacheError {
        let path = placeholder.key();
        self.misses.fetch_add(1, Ordering::Relaxed);
        if self.store.insert_if_absent(placeholder) {
            debug!(path = %path, "Cache MISS, placeholder created");
        }
        CacheError::CacheMiss { path }
    }

    /// Fetch `path` and, for folders, all of its children pages, then store it
    pub async fn populate(&self, path: &str) -> Result<CacheNode, CacheError> {
        let upstream = |e: crate::graph::GraphError| CacheError::UpstreamFailed {
            path: path.to_string(),
            reason: e.to_string(),
        };

        let item = self.remote.get_item(path).await.map_err(upstream)?;
        let mut node = CacheNode::from_remote(item);

        if node.is_folder() {
            let mut children = Vec::new();
            let mut next: Option<String> = None;
            let mut pages = 0;
            loop {
                if pages == MAX_CHILDREN_PAGES {
                    return Err(CacheError::PaginationExhausted {
                        path: path.to_string(),
                        pages,
                    });
                }
                let page = self
                    .remote
                    .get_children(path, next.as_deref())
                    .await
                    .map_err(upstream)?;
                pages += 1;
                children.extend(page.items.into_iter().map(CacheNode::from_remote));
                match page.next_link {
                    Some(link) => next = Some(link),
                    None => break,
                }
            }
            debug!(path = %path, pages = pages, children = children.len(), "Listed folder");
            node.children = Some(children);
        }

        node.description = Some(CacheDescription::new(path, Status::Cached, now()));
        self.store.upsert(node.clone());
        info!(path = %path, file = node.is_file(), "Populated cache node");
        Ok(node)
    }

    /// Populate `path`, sharing any populate already in flight.
    ///
    /// Only the caller that runs the populate marks the node `Caching`; callers
    /// joining it must not, as the populate's upsert may already be done.
    /// On failure the node is marked `Failed` and keeps its last update time.
    pub async fn refresh(&self, path: &str) -> Result<CacheNode, CacheError> {
        self.store.insert_if_absent(CacheNode::placeholder(path, None));

        let result = self
            .inflight
            .try_get_with(path.to_string(), async {
                let started = now();
                self.store.update_description(path, |d| {
                    d.status = Status::Caching;
                    d.caching_since = Some(started);
                });
                match tokio::time::timeout(self.fetch_timeout, self.populate(path)).await {
                    Ok(result) => result,
                    Err(_) => Err(CacheError::UpstreamFailed {
                        path: path.to_string(),
                        reason: format!("timed out after {:?}", self.fetch_timeout),
                    }),
                }
            })
            .await;
        self.inflight.invalidate(path).await;

        match result {
            Ok(node) => Ok(node),
            Err(e) => {
                let error = (*e).clone();
                self.store.update_description(path, |d| {
                    d.status = Status::Failed;
                    d.caching_since = None;
                });
                warn!(path = %path, error = %error, "Refresh failed");
                Err(error)
            }
        }
    }

    /// Run `refresh` as an independent task
    pub fn spawn_refresh(self: &Arc<Self>, path: String) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = engine.refresh(&path).await {
                debug!(path = %path, error = %e, "Background refresh did not complete");
            }
        })
    }

    /// Returns (hits, misses)
    pub fn stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}

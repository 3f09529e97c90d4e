//! Drive API Client
//!
//! Provides authenticated, read-only access to a Graph-style drive API.
//! Token acquisition happens elsewhere; this client only carries a bearer
//! token that can be rotated at runtime.

use anyhow::{anyhow, Context, Result};
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::errors::GraphError;
use super::types::{DriveInfo, DriveItem, DriveItemPage};
use super::RemoteFetch;

/// Canonical path of the drive root
pub const DRIVE_ROOT: &str = "/drive/root:";

/// Maximum number of retries for retryable errors
const MAX_RETRIES: usize = 3;

/// Maximum number of recent errors to track
const MAX_ERROR_HISTORY: usize = 10;

/// Health status values
pub const HEALTH_HEALTHY: u8 = 0;
pub const HEALTH_DEGRADED: u8 = 1;
pub const HEALTH_UNHEALTHY: u8 = 2;

/// A recent error entry for tracking
#[derive(Debug, Clone)]
pub struct ErrorEntry {
    pub timestamp: u64,
    pub operation: String,
    pub path: String,
    pub error: String,
}

/// Drive API client for making authenticated requests
#[derive(Clone)]
pub struct GraphClient {
    /// HTTP client for making requests
    http_client: Client,
    /// API base, e.g. `https://graph.microsoft.com/v1.0`
    endpoint: String,
    /// Bearer token (rotated by whoever owns the OAuth flow)
    access_token: Arc<RwLock<String>>,
    /// Connection health (0=healthy, 1=degraded, 2=unhealthy)
    health: Arc<AtomicU8>,
    /// Recent error log
    error_log: Arc<RwLock<VecDeque<ErrorEntry>>>,
}

/// Build the request URL for a single item addressed by canonical path.
///
/// Absolute URLs are passed through unchanged.
pub fn item_url(endpoint: &str, path: &str) -> String {
    if is_absolute_url(path) {
        return path.to_string();
    }
    match path.strip_prefix(DRIVE_ROOT) {
        Some("") | Some("/") => format!("{}/me/drive/root", endpoint),
        Some(rest) => format!("{}/me{}{}", endpoint, DRIVE_ROOT, encode_segments(rest)),
        None => format!("{}/me{}", endpoint, encode_segments(path)),
    }
}

/// Build the request URL for the first page of a folder's children
pub fn children_url(endpoint: &str, path: &str) -> String {
    match path.strip_prefix(DRIVE_ROOT) {
        Some("") | Some("/") => format!("{}/me/drive/root/children", endpoint),
        _ => format!("{}:/children", item_url(endpoint, path)),
    }
}

fn is_absolute_url(path: &str) -> bool {
    path.starts_with("https://") || path.starts_with("http://")
}

/// Percent-encode each segment while keeping the separators
fn encode_segments(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn read_lock<T: Clone>(lock: &RwLock<T>) -> T {
    match lock.read() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

impl GraphClient {
    /// Create a client for the given API endpoint
    ///
    /// # Arguments
    /// * `endpoint` - API base URL (http or https)
    /// * `access_token` - Bearer token for all requests
    /// * `timeout` - Per-request timeout
    pub fn new(endpoint: &str, access_token: String, timeout: Duration) -> Result<Self> {
        let parsed = Url::parse(endpoint)
            .with_context(|| format!("Invalid drive API endpoint: {}", endpoint))?;
        if parsed.scheme() != "https" && parsed.scheme() != "http" {
            return Err(anyhow!("Drive API endpoint must be http(s): {}", endpoint));
        }

        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        info!(endpoint = endpoint, "Drive API client ready");

        Ok(Self {
            http_client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            access_token: Arc::new(RwLock::new(access_token)),
            health: Arc::new(AtomicU8::new(HEALTH_HEALTHY)),
            error_log: Arc::new(RwLock::new(VecDeque::with_capacity(MAX_ERROR_HISTORY))),
        })
    }

    /// Replace the bearer token used for subsequent requests
    pub fn set_access_token(&self, token: String) {
        match self.access_token.write() {
            Ok(mut guard) => *guard = token,
            Err(poisoned) => *poisoned.into_inner() = token,
        }
        debug!("Drive API access token rotated");
    }

    /// Execute an operation with retry logic and exponential backoff
    async fn with_retry<F, Fut, T>(&self, operation: &str, path: &str, f: F) -> Result<T, GraphError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, GraphError>>,
    {
        let backoff_ms = [500u64, 1000, 2000];
        let mut attempt = 0;

        loop {
            match f().await {
                Ok(result) => {
                    self.health.store(HEALTH_HEALTHY, Ordering::Relaxed);
                    return Ok(result);
                }
                Err(e) => {
                    if !e.is_retryable() || attempt == MAX_RETRIES {
                        // Final failure: log error and update health
                        match e {
                            GraphError::Network(_) | GraphError::Timeout => {
                                self.health.store(HEALTH_UNHEALTHY, Ordering::Relaxed)
                            }
                            GraphError::RateLimited | GraphError::Server(_, _) => {
                                self.health.store(HEALTH_DEGRADED, Ordering::Relaxed)
                            }
                            _ => {}
                        }
                        self.log_error(operation, path, &e.to_string());
                        return Err(e);
                    }

                    let delay = backoff_ms.get(attempt).copied().unwrap_or(2000);
                    warn!(
                        operation = operation,
                        attempt = attempt + 1,
                        max = MAX_RETRIES,
                        delay_ms = delay,
                        error = %e,
                        "Retrying drive API operation"
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
            }
        }
    }

    /// GET a URL and decode the JSON body
    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, GraphError> {
        debug!(url = %url, "GET");

        let response = self
            .http_client
            .get(url)
            .bearer_auth(read_lock(&self.access_token))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(GraphError::from_status(status, &body));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| GraphError::Decode(e.to_string()))
    }

    /// Log an error to the error history ring buffer
    fn log_error(&self, operation: &str, path: &str, error: &str) {
        let entry = ErrorEntry {
            timestamp: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            operation: operation.to_string(),
            path: path.to_string(),
            error: error.to_string(),
        };

        let mut log = match self.error_log.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if log.len() >= MAX_ERROR_HISTORY {
            log.pop_front();
        }
        log.push_back(entry);
    }
}

impl RemoteFetch for GraphClient {
    async fn get_drive(&self) -> Result<DriveInfo, GraphError> {
        let url = format!("{}/me/drive", self.endpoint);
        self.with_retry("get_drive", "/me/drive", || self.get_json::<DriveInfo>(&url))
            .await
    }

    async fn get_item(&self, path: &str) -> Result<DriveItem, GraphError> {
        let url = item_url(&self.endpoint, path);
        let item = self
            .with_retry("get_item", path, || self.get_json::<DriveItem>(&url))
            .await?;
        debug!(path = path, id = %item.id, "Fetched drive item");
        Ok(item)
    }

    async fn get_children(
        &self,
        path: &str,
        continuation: Option<&str>,
    ) -> Result<DriveItemPage, GraphError> {
        let url = match continuation {
            Some(next) => next.to_string(),
            None => children_url(&self.endpoint, path),
        };
        let page = self
            .with_retry("get_children", path, || self.get_json::<DriveItemPage>(&url))
            .await?;
        debug!(
            path = path,
            count = page.items.len(),
            more = page.next_link.is_some(),
            "Fetched children page"
        );
        Ok(page)
    }

    fn health_status(&self) -> &'static str {
        match self.health.load(Ordering::Relaxed) {
            HEALTH_HEALTHY => "healthy",
            HEALTH_DEGRADED => "degraded",
            _ => "unhealthy",
        }
    }

    fn recent_errors(&self) -> Vec<ErrorEntry> {
        read_lock(&self.error_log).into_iter().collect()
    }
}

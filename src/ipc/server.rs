//! IPC Server - Unix socket request surface
//!
//! Handles incoming connections and dispatches commands to the configured
//! drives through the DriveManager.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::cache::CacheError;
use crate::drive::DriveManager;
use crate::graph::RemoteFetch;
use crate::ipc::protocol::{
    parse_command, serialize_response, Command, DriveSummary, Response, UpstreamError,
    PROTOCOL_VERSION,
};

/// IPC Server that listens for client commands
pub struct IpcServer<F: RemoteFetch> {
    /// Drives the commands are served from
    manager: Arc<DriveManager<F>>,
    socket_path: PathBuf,
    /// Socket listener
    listener: Option<UnixListener>,
    /// Active connections counter
    connection_count: Arc<RwLock<u32>>,
}

impl<F: RemoteFetch> IpcServer<F> {
    /// Create a new IPC server
    pub fn new(manager: Arc<DriveManager<F>>, socket_path: PathBuf) -> Self {
        Self {
            manager,
            socket_path,
            listener: None,
            connection_count: Arc::new(RwLock::new(0)),
        }
    }

    /// Bind the socket, replacing a stale socket file
    pub async fn start(&mut self) -> Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)
                .context("Failed to remove existing socket file")?;
        }

        let listener = UnixListener::bind(&self.socket_path)
            .with_context(|| format!("Failed to bind Unix socket {}", self.socket_path.display()))?;

        info!(socket_path = %self.socket_path.display(), "IPC server started");

        self.listener = Some(listener);
        Ok(())
    }

    /// Run the server loop, accepting connections
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref().context("Server not started")?;

        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let manager = Arc::clone(&self.manager);
                    let connection_count = Arc::clone(&self.connection_count);

                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, manager, connection_count).await {
                            error!(error = %e, "Connection handler error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    /// Stop the IPC server and clean up
    pub async fn stop(&self) -> Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).context("Failed to remove socket file")?;
        }
        info!(connections = self.connection_count().await, "IPC server stopped");
        Ok(())
    }

    /// Get the number of active connections
    pub async fn connection_count(&self) -> u32 {
        *self.connection_count.read().await
    }
}

/// Handle a single client connection
async fn handle_connection<F: RemoteFetch>(
    stream: UnixStream,
    manager: Arc<DriveManager<F>>,
    connection_count: Arc<RwLock<u32>>,
) -> Result<()> {
    {
        let mut count = connection_count.write().await;
        *count += 1;
        debug!(count = *count, "New connection");
    }

    let (reader, mut writer) = stream.into_split();
    let mut buf_reader = BufReader::new(reader);
    let mut line = String::new();

    // Read commands line by line (newline-delimited JSON)
    loop {
        line.clear();
        match buf_reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("Connection closed by client");
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }

                debug!(command = %trimmed, "Received command");

                let response = match parse_command(trimmed.as_bytes()) {
                    Ok(command) => process_command(command, &manager).await,
                    Err(e) => {
                        error!(error = %e, command = %trimmed, "Failed to parse command");
                        Response::Error {
                            error: format!("Invalid command: {}", e),
                        }
                    }
                };

                match serialize_response(&response) {
                    Ok(json) => {
                        if let Err(e) = writer.write_all(&json).await {
                            error!(error = %e, "Failed to write response");
                            break;
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to serialize response");
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to read from socket");
                break;
            }
        }
    }

    {
        let mut count = connection_count.write().await;
        *count = count.saturating_sub(1);
        debug!(count = *count, "Connection ended");
    }

    Ok(())
}

/// Map a cache error onto the wire.
///
/// Anything the cache may still answer later, or that this path can never
/// serve, is `notFound`; a runaway listing is a server error.
fn cache_error_response(error: CacheError) -> Response {
    match error {
        CacheError::PaginationExhausted { .. } => Response::Error {
            error: error.to_string(),
        },
        other => Response::NotFound {
            error: other.to_string(),
        },
    }
}

/// Process a command and return a response
async fn process_command<F: RemoteFetch>(command: Command, manager: &DriveManager<F>) -> Response {
    match command {
        Command::GetItem { drive, path, force } => {
            debug!(drive = ?drive, path = %path, force, "Processing getItem command");

            let drive = match manager.get(drive.as_deref()).await {
                Ok(drive) => drive,
                Err(e) => return Response::Error { error: e.to_string() },
            };
            match drive.get_item(&path, force) {
                Ok(item) => Response::Item { item },
                Err(e) => cache_error_response(e),
            }
        }

        Command::GetContent { drive, path } => {
            debug!(drive = ?drive, path = %path, "Processing getContent command");

            let drive = match manager.get(drive.as_deref()).await {
                Ok(drive) => drive,
                Err(e) => return Response::Error { error: e.to_string() },
            };
            match drive.content_url(&path).await {
                Ok(location) => Response::Redirect { location },
                Err(e) => cache_error_response(e),
            }
        }

        Command::ForceRefresh { drive, path } => {
            info!(drive = ?drive, path = %path, "Processing forceRefresh command");

            let drive = match manager.get(drive.as_deref()).await {
                Ok(drive) => drive,
                Err(e) => return Response::Error { error: e.to_string() },
            };
            let marked = drive.force_refresh(&path);
            Response::Success {
                message: Some(format!("Marked {} node(s) for refresh", marked)),
            }
        }

        Command::GetStatus => {
            debug!("Processing getStatus command");

            let drives: Vec<DriveSummary> = manager
                .list_drives()
                .await
                .into_iter()
                .map(|d| DriveSummary {
                    name: d.name,
                    drive_id: d.drive_id,
                    root: d.root,
                    nodes: d.nodes,
                    hits: d.hits,
                    misses: d.misses,
                    health: d.health.to_string(),
                    recent_errors: d
                        .recent_errors
                        .into_iter()
                        .map(|e| UpstreamError {
                            timestamp: e.timestamp,
                            operation: e.operation,
                            path: e.path,
                            error: e.error,
                        })
                        .collect(),
                })
                .collect();

            Response::Status {
                version: PROTOCOL_VERSION,
                healthy: drives.iter().all(|d| d.health == "healthy"),
                drives,
            }
        }
    }
}

//! drivecache daemon - caching gateway for a remote cloud drive
//!
//! Mirrors the configured drives into path-keyed caches, keeps them fresh in
//! the background and answers lookups over a Unix socket.

mod cache;
mod config;
mod drive;
mod graph;
mod ipc;

use anyhow::{anyhow, Context, Result};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use cache::engine::DEFAULT_FETCH_TIMEOUT;
use config::{default_config_path, Config};
use drive::DriveManager;
use graph::GraphClient;
use ipc::IpcServer;

/// CLI command
#[derive(Debug)]
enum Command {
    /// Run the daemon (default)
    Serve { config: Option<PathBuf> },
    /// Load and validate the config, then print the drives
    Check { config: Option<PathBuf> },
    /// Show help
    Help,
}

fn print_help() {
    eprintln!(
        r#"drivecache daemon - Cache a remote cloud drive behind a local socket

USAGE:
    drivecache-daemon [serve] [-c <config>]
    drivecache-daemon check [-c <config>]
    drivecache-daemon help

COMMANDS:
    serve   Run the daemon (default)
    check   Validate the config and print the configured drives
    help    Show this help message

OPTIONS:
    -c, --config <file>   Config file (default: <config dir>/drivecache/config.json)

ENVIRONMENT:
    GRAPH_ACCESS_TOKEN    Bearer token, overrides accessToken from the config
    RUST_LOG              Log filter (trace, debug, info, warn, error)

NOTE:
    A missing config file is replaced by a template; fill it in and restart.
"#
    );
}

fn parse_args(args: &[String]) -> Result<Command> {
    let mut subcommand = None;
    let mut config = None;

    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-c" | "--config" => {
                let path = iter
                    .next()
                    .ok_or_else(|| anyhow!("Usage: drivecache-daemon [serve|check] -c <config>"))?;
                config = Some(PathBuf::from(path));
            }
            "help" | "--help" | "-h" => return Ok(Command::Help),
            "serve" | "check" if subcommand.is_none() => subcommand = Some(arg.clone()),
            other => return Err(anyhow!("Unknown argument: {}", other)),
        }
    }

    match subcommand.as_deref() {
        Some("check") => Ok(Command::Check { config }),
        _ => Ok(Command::Serve { config }),
    }
}

fn load_config(path: Option<PathBuf>) -> Result<Config> {
    let path = path.unwrap_or_else(default_config_path);
    Config::load(&path).with_context(|| format!("Failed to load config from {}", path.display()))
}

/// Register every configured drive, each with its own client
async fn build_manager(config: &Config) -> Result<Arc<DriveManager<GraphClient>>> {
    let manager = DriveManager::new(config.snapshot_dir.clone(), DEFAULT_FETCH_TIMEOUT);
    for drive in &config.drives {
        let client = GraphClient::new(
            &config.graph_endpoint,
            config.access_token_for(drive),
            config.request_timeout(),
        )?;
        manager.add_drive(drive, Arc::new(client)).await?;
    }
    Ok(Arc::new(manager))
}

async fn serve(config: Config) -> Result<()> {
    info!("Starting drivecache daemon");

    let manager = build_manager(&config).await?;
    manager.start_refreshers().await;

    let mut ipc_server = IpcServer::new(Arc::clone(&manager), config.socket_path.clone());
    if let Err(e) = ipc_server.start().await {
        error!(error = %e, "Failed to start IPC server");
        manager.shutdown().await;
        return Err(e);
    }
    let ipc_server = Arc::new(ipc_server);

    info!(drives = config.drives.len(), "Daemon ready");

    let ipc_handle = {
        let ipc_server = Arc::clone(&ipc_server);
        tokio::spawn(async move {
            if let Err(e) = ipc_server.run().await {
                error!(error = %e, "IPC server error");
            }
        })
    };

    tokio::signal::ctrl_c().await?;

    info!("Received shutdown signal, saving caches...");
    ipc_handle.abort();
    ipc_server.stop().await?;
    manager.shutdown().await;

    info!("Shutdown complete.");
    Ok(())
}

fn check(config: &Config) {
    println!("Socket:    {}", config.socket_path.display());
    println!("Snapshots: {}", config.snapshot_dir.display());
    println!("Endpoint:  {}", config.graph_endpoint);
    println!("Drives:");
    for drive in &config.drives {
        println!(
            "  {} root='{}' refresh={}s validity={}s mounts={}",
            drive.name,
            drive.root_path,
            drive.refresh_interval,
            drive.download_url_validity,
            drive.volume_mounts.len()
        );
        for mount in &drive.volume_mounts {
            println!(
                "    {} -> {}{}",
                mount.target,
                mount.source,
                if mount.is_file_only() { " (files only)" } else { "" }
            );
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args: Vec<String> = env::args().collect();
    let command = match parse_args(&args) {
        Ok(cmd) => cmd,
        Err(e) => {
            eprintln!("Error: {}", e);
            print_help();
            std::process::exit(1);
        }
    };

    match command {
        Command::Serve { config } => {
            let config = load_config(config)?;
            serve(config).await?;
        }
        Command::Check { config } => {
            let config = load_config(config)?;
            check(&config);
        }
        Command::Help => {
            print_help();
        }
    }

    Ok(())
}

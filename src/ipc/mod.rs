//! IPC server for the daemon's request surface

pub mod protocol;
pub mod server;

pub use server::IpcServer;

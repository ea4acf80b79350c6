//! Error types for the kubetunnel-core library.

use thiserror::Error;

use crate::domain::ProcessInfo;
use crate::kubernetes::errors::KubectlError;

/// Result type alias for kubetunnel operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while supervising tunnels and inspecting processes.
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to execute a system command.
    #[error("Command execution failed: {0}")]
    CommandFailed(String),

    /// Failed to kill a process.
    #[error("Failed to kill process {pid}: {reason}")]
    KillFailed { pid: u32, reason: String },

    /// Port number outside the valid TCP range.
    #[error("Invalid port {0}: must be between 1 and 65535")]
    InvalidPort(u16),

    /// PID that cannot name a real process.
    #[error("Invalid process id {0}")]
    InvalidPid(u32),

    /// Tunnel configuration rejected before an instance was created.
    #[error("Invalid tunnel configuration: {0}")]
    InvalidConfig(String),

    /// A tunnel with the same identity is already registered.
    #[error("Port forward {0} already exists")]
    AlreadyExists(String),

    /// No tunnel is registered under the identity.
    #[error("Port forward {0} not found")]
    NotFound(String),

    /// The local port is bound by another OS process.
    #[error(
        "Local port {port} is already in use by {} (PID {})",
        .process.process_name,
        .process.pid
    )]
    PortInUse { port: u16, process: ProcessInfo },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Kubernetes/kubectl error.
    #[error("Kubernetes error: {0}")]
    Kubernetes(#[from] KubectlError),
}

impl Error {
    /// Returns the process holding the port when this is a port conflict.
    pub fn port_conflict(&self) -> Option<&ProcessInfo> {
        match self {
            Error::PortInUse { process, .. } => Some(process),
            _ => None,
        }
    }
}

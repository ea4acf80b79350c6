//! Errors raised while driving kubectl.

use thiserror::Error;

/// Result type alias for kubectl operations.
pub type Result<T> = std::result::Result<T, KubectlError>;

/// Errors that can occur while invoking kubectl.
#[derive(Error, Debug)]
pub enum KubectlError {
    /// No kubectl binary could be located.
    #[error("kubectl not found; install it or set kubectlPath in the config")]
    KubectlNotFound,

    /// The cluster could not be reached with the current kubeconfig.
    #[error("Cluster not connected: {0}")]
    ClusterNotConnected(String),

    /// kubectl ran but reported a failure.
    #[error("kubectl failed: {0}")]
    CommandFailed(String),

    /// A kubectl subprocess could not be managed.
    #[error("Process error: {0}")]
    ProcessError(String),

    /// kubectl output did not have the expected shape.
    #[error("Failed to parse kubectl output: {0}")]
    ParsingFailed(String),

    /// kubectl did not answer in time.
    #[error("kubectl timed out")]
    Timeout,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl KubectlError {
    /// Classifies kubectl stderr.
    pub fn from_kubectl_error(stderr: &str) -> Self {
        let message = stderr.trim().to_string();
        let lower = message.to_lowercase();

        if lower.contains("connection refused")
            || lower.contains("no configuration has been provided")
            || lower.contains("dial tcp")
            || lower.contains("unable to connect to the server")
        {
            KubectlError::ClusterNotConnected(message)
        } else {
            KubectlError::CommandFailed(message)
        }
    }

    pub fn is_cluster_not_connected(&self) -> bool {
        matches!(self, KubectlError::ClusterNotConnected(_))
    }
}

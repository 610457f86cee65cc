//! CLI error types.
//!
//! Failures of the binary itself; everything below is a [`DevError`] or
//! [`ClusterError`] carried through unchanged.

use cluster_client::ClusterError;
use devloop_core::DevError;
use thiserror::Error;

/// Errors that can occur in the devloop binary.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Core operation failed
    #[error(transparent)]
    Core(#[from] DevError),

    /// Cluster connection or API error outside a core operation
    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    /// Local I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

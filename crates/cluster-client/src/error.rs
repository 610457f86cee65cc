//! Cluster client errors

use thiserror::Error;

/// Errors that can occur when talking to the cluster API
#[derive(Debug, Error)]
pub enum ClusterError {
    /// Transport or API error reported by kube
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Resource not found (HTTP 404)
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    /// Optimistic-concurrency collision (HTTP 409)
    #[error("conflict updating {kind} {name}")]
    Conflict { kind: &'static str, name: String },

    /// Remote command failed or the exec channel broke
    #[error("exec failed: {0}")]
    Exec(String),

    /// Local stream error while feeding or draining an exec channel
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Watch could not be established or was refused
    #[error("watch error: {0}")]
    Watch(String),
}

impl ClusterError {
    /// Map a kube error for a named resource, turning 404 and 409 into
    /// their dedicated variants.
    pub fn from_kube(err: kube::Error, kind: &'static str, name: &str) -> Self {
        match err {
            kube::Error::Api(ref response) if response.code == 404 => ClusterError::NotFound {
                kind,
                name: name.to_string(),
            },
            kube::Error::Api(ref response) if response.code == 409 => ClusterError::Conflict {
                kind,
                name: name.to_string(),
            },
            other => ClusterError::Kube(other),
        }
    }

    /// True for [`ClusterError::NotFound`]
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound { .. })
    }

    /// True for [`ClusterError::Conflict`]
    pub fn is_conflict(&self) -> bool {
        matches!(self, ClusterError::Conflict { .. })
    }
}

//! devloop core errors
//!
//! Every failure carries a stable [`ErrorKind`] so callers can decide
//! whether to retry, clean up or abort without matching on messages.

use std::path::PathBuf;
use std::time::Duration;

use cluster_client::ClusterError;
use thiserror::Error;

/// Failure category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Timeout,
    WatchTerminated,
    ConditionFailed,
    Corruption,
    Malformed,
    Invalid,
    PartialCompletion,
    Cluster,
    Io,
}

/// Errors produced by the devloop core operations
#[derive(Debug, Error)]
pub enum DevError {
    /// Resource absent; never auto-created
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    /// Optimistic-concurrency retries exhausted
    #[error("{kind} {name}: update conflicted {attempts} times, giving up")]
    Conflict {
        kind: &'static str,
        name: String,
        attempts: u32,
    },

    /// Condition not observed within its budget
    #[error("timed out after {after:?} waiting for {what}")]
    Timeout { what: String, after: Duration },

    /// Event stream closed or delivered an error event
    #[error("watch for {what} terminated: {reason}")]
    WatchTerminated { what: String, reason: String },

    /// The watched resource reached a state that can never satisfy the condition
    #[error("{what} failed: {reason}")]
    ConditionFailed { what: String, reason: String },

    /// A structural invariant of a workload did not hold
    #[error("corrupt {kind} {name}: {detail}")]
    Corruption {
        kind: &'static str,
        name: String,
        detail: String,
    },

    /// Local file set missing or unreadable while building an archive
    #[error("cannot archive {}: {source}", path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Caller input could not be parsed or is inconsistent
    #[error("invalid input: {0}")]
    Invalid(String),

    /// An earlier step committed before a later one failed
    #[error("{completed} succeeded, but {stage} failed: {source}")]
    PartialCompletion {
        completed: String,
        stage: String,
        #[source]
        source: Box<DevError>,
    },

    /// Operation and resource context around another error
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<DevError>,
    },

    /// Cluster API error not covered by a more specific kind
    #[error("cluster error: {0}")]
    Cluster(#[source] ClusterError),

    /// Local I/O error outside archive construction
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ClusterError> for DevError {
    fn from(err: ClusterError) -> Self {
        match err {
            ClusterError::NotFound { kind, name } => DevError::NotFound { kind, name },
            other => DevError::Cluster(other),
        }
    }
}

impl DevError {
    /// Category of this error, looking through context wrappers
    pub fn kind(&self) -> ErrorKind {
        match self {
            DevError::NotFound { .. } => ErrorKind::NotFound,
            DevError::Conflict { .. } => ErrorKind::Conflict,
            DevError::Timeout { .. } => ErrorKind::Timeout,
            DevError::WatchTerminated { .. } => ErrorKind::WatchTerminated,
            DevError::ConditionFailed { .. } => ErrorKind::ConditionFailed,
            DevError::Corruption { .. } => ErrorKind::Corruption,
            DevError::Malformed { .. } => ErrorKind::Malformed,
            DevError::Invalid(_) => ErrorKind::Invalid,
            DevError::PartialCompletion { .. } => ErrorKind::PartialCompletion,
            DevError::Context { source, .. } => source.kind(),
            DevError::Cluster(ClusterError::NotFound { .. }) => ErrorKind::NotFound,
            DevError::Cluster(ClusterError::Conflict { .. }) => ErrorKind::Conflict,
            DevError::Cluster(_) => ErrorKind::Cluster,
            DevError::Io(_) => ErrorKind::Io,
        }
    }

    /// Wrap with the operation and resource that produced the error
    pub fn context(self, context: impl Into<String>) -> Self {
        DevError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Innermost error under any context wrappers
    pub fn root(&self) -> &DevError {
        match self {
            DevError::Context { source, .. } => source.root(),
            other => other,
        }
    }

    pub(crate) fn corruption(kind: &'static str, name: &str, detail: impl Into<String>) -> Self {
        DevError::Corruption {
            kind,
            name: name.to_string(),
            detail: detail.into(),
        }
    }
}

/// Attach operation context to a fallible result
pub trait ResultExt<T> {
    fn context(self, context: impl FnOnce() -> String) -> Result<T, DevError>;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: Into<DevError>,
{
    fn context(self, context: impl FnOnce() -> String) -> Result<T, DevError> {
        self.map_err(|e| e.into().context(context()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_looks_through_context() {
        let err = DevError::corruption("DeploymentConfig", "web", "no primary container")
            .context("patch DeploymentConfig web")
            .context("switch web to build mode");
        assert_eq!(err.kind(), ErrorKind::Corruption);
        assert!(matches!(err.root(), DevError::Corruption { .. }));
    }

    #[test]
    fn test_cluster_not_found_maps_to_not_found() {
        let err: DevError = ClusterError::NotFound {
            kind: "DeploymentConfig",
            name: "web".to_string(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_partial_completion_keeps_its_kind() {
        let err = DevError::PartialCompletion {
            completed: "patch web".to_string(),
            stage: "create claim web-s2idata".to_string(),
            source: Box::new(DevError::Invalid("quota".to_string())),
        };
        assert_eq!(err.kind(), ErrorKind::PartialCompletion);
        assert!(err.to_string().contains("create claim web-s2idata"));
    }

    #[test]
    fn test_result_ext_wraps_message() {
        let res: Result<(), ClusterError> = Err(ClusterError::Exec("boom".to_string()));
        let err = res.context(|| "push to pod web-1".to_string()).unwrap_err();
        assert_eq!(err.to_string(), "push to pod web-1: cluster error: exec failed: boom");
        assert_eq!(err.kind(), ErrorKind::Cluster);
    }
}

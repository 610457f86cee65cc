//! Exec recording for MockClusterClient

use std::time::Duration;

use tokio::io::AsyncReadExt;

use super::{MockClusterClient, lock};
use crate::error::ClusterError;
use crate::models::{BoxedAsyncRead, ExecOutput};

/// One recorded exec invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecCall {
    pub pod: String,
    pub container: Option<String>,
    pub command: Vec<String>,
    /// Everything read from stdin before it reached EOF
    pub stdin: Vec<u8>,
    pub tty: bool,
}

/// How long a hung-up exec lingers before reporting its failure
const HANG_UP_LINGER: Duration = Duration::from_millis(20);

/// A scripted exec failure
#[derive(Debug, Clone)]
pub(crate) struct ExecFailure {
    message: String,
    /// Close stdin without reading it, like a remote command that exits early
    hang_up: bool,
}

impl MockClusterClient {
    /// All exec calls in the order they completed
    pub fn exec_calls(&self) -> Vec<ExecCall> {
        lock(&self.exec_calls).clone()
    }

    /// Make the next exec fail with `message` after draining stdin
    pub fn fail_next_exec(&self, message: impl Into<String>) {
        lock(&self.exec_failures).push_back(ExecFailure {
            message: message.into(),
            hang_up: false,
        });
    }

    /// Make the next exec close stdin unread, then fail with `message`
    pub fn hang_up_next_exec(&self, message: impl Into<String>) {
        lock(&self.exec_failures).push_back(ExecFailure {
            message: message.into(),
            hang_up: true,
        });
    }
}

pub(super) async fn exec(
    client: &MockClusterClient,
    pod: &str,
    container: Option<&str>,
    command: &[String],
    stdin: Option<BoxedAsyncRead>,
    tty: bool,
) -> Result<ExecOutput, ClusterError> {
    let known = lock(&client.pods).contains(pod);
    if !known {
        return Err(ClusterError::NotFound {
            kind: "Pod",
            name: pod.to_string(),
        });
    }

    let failure = lock(&client.exec_failures).pop_front();
    let mut received = Vec::new();
    match (failure.as_ref().is_some_and(|f| f.hang_up), stdin) {
        (true, stdin) => {
            drop(stdin);
            tokio::time::sleep(HANG_UP_LINGER).await;
        }
        (false, Some(mut stdin)) => {
            stdin.read_to_end(&mut received).await?;
        }
        (false, None) => {}
    }

    lock(&client.exec_calls).push(ExecCall {
        pod: pod.to_string(),
        container: container.map(str::to_string),
        command: command.to_vec(),
        stdin: received,
        tty,
    });

    match failure {
        Some(failure) => Err(ClusterError::Exec(failure.message)),
        None => Ok(ExecOutput::default()),
    }
}

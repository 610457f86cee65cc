//! Condition Watcher
//!
//! Waits until a remote resource satisfies a predicate, over a watch
//! subscription, bounded by a timeout. Exactly one outcome is produced per
//! wait and the subscription is dropped on every exit path.

use std::sync::Arc;
use std::time::Duration;

use cluster_client::{ChangeType, ClusterClient, Selector, WatchEvent, WatchStream};
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Pod, Secret};
use kube::{Resource, ResourceExt};
use openshift_types::{Build, BuildPhase, DeploymentConfig};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::DevError;
use crate::settings::Settings;

/// Predicate result for one snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Keep waiting
    Pending,
    /// Condition holds for this snapshot
    Satisfied,
    /// Condition can never hold; stop now
    Failed(String),
}

/// Metadata field a [`Condition`] reads
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldPath {
    Annotation(String),
    Label(String),
}

/// Field value expected on a named resource, and how long to wait for it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub field: FieldPath,
    /// `None` only requires the field to be present
    pub expected: Option<String>,
    pub timeout: Duration,
}

impl Condition {
    /// Annotation `key` must equal `value`
    pub fn annotation_equals(key: impl Into<String>, value: impl Into<String>, timeout: Duration) -> Self {
        Self {
            field: FieldPath::Annotation(key.into()),
            expected: Some(value.into()),
            timeout,
        }
    }

    /// Label `key` must equal `value`
    pub fn label_equals(key: impl Into<String>, value: impl Into<String>, timeout: Duration) -> Self {
        Self {
            field: FieldPath::Label(key.into()),
            expected: Some(value.into()),
            timeout,
        }
    }

    /// Evaluate against one snapshot
    pub fn evaluate<K: Resource>(&self, obj: &K) -> Verdict {
        let actual = match &self.field {
            FieldPath::Annotation(key) => obj.annotations().get(key),
            FieldPath::Label(key) => obj.labels().get(key),
        };
        let holds = match (&self.expected, actual) {
            (Some(expected), Some(actual)) => expected == actual,
            (None, Some(_)) => true,
            (_, None) => false,
        };
        if holds { Verdict::Satisfied } else { Verdict::Pending }
    }
}

enum WaitState<K> {
    Pending,
    Satisfied(K),
    Failed(DevError),
}

/// Fold events until `check` resolves, the stream dies or `timeout` elapses.
///
/// With `timeout == None` only the stream can end the wait; the caller owns
/// the timer.
async fn run_wait<K, F>(mut stream: WatchStream<K>, what: &str, timeout: Option<Duration>, mut check: F) -> Result<K, DevError>
where
    F: FnMut(ChangeType, &K) -> Verdict,
{
    let deadline = tokio::time::sleep(timeout.unwrap_or_default());
    tokio::pin!(deadline);

    let mut state = WaitState::Pending;
    while matches!(state, WaitState::Pending) {
        state = tokio::select! {
            biased;
            () = &mut deadline, if timeout.is_some() => WaitState::Failed(DevError::Timeout {
                what: what.to_string(),
                after: timeout.unwrap_or_default(),
            }),
            event = stream.next() => match event {
                Some(Ok(event)) => {
                    let change = event.change_type();
                    match event {
                        WatchEvent::Error(reason) => WaitState::Failed(DevError::WatchTerminated {
                            what: what.to_string(),
                            reason,
                        }),
                        WatchEvent::Added(obj) | WatchEvent::Modified(obj) | WatchEvent::Deleted(obj) => {
                            debug!("{} event while waiting for {}", change, what);
                            match check(change, &obj) {
                                Verdict::Pending => WaitState::Pending,
                                Verdict::Satisfied => WaitState::Satisfied(obj),
                                Verdict::Failed(reason) => WaitState::Failed(DevError::ConditionFailed {
                                    what: what.to_string(),
                                    reason,
                                }),
                            }
                        }
                    }
                }
                Some(Err(err)) => WaitState::Failed(DevError::WatchTerminated {
                    what: what.to_string(),
                    reason: err.to_string(),
                }),
                None => WaitState::Failed(DevError::WatchTerminated {
                    what: what.to_string(),
                    reason: "event stream closed".to_string(),
                }),
            },
        };
    }

    match state {
        WaitState::Satisfied(obj) => Ok(obj),
        WaitState::Failed(err) => Err(err),
        WaitState::Pending => Err(DevError::WatchTerminated {
            what: what.to_string(),
            reason: "wait ended without an outcome".to_string(),
        }),
    }
}

/// Wait on `stream` for the first snapshot `check` accepts.
///
/// Returns that snapshot; a stream error, error event or end of stream is
/// [`DevError::WatchTerminated`], `Verdict::Failed` is
/// [`DevError::ConditionFailed`] and running out of time is
/// [`DevError::Timeout`]. The stream is dropped before returning.
pub async fn await_condition<K, F>(stream: WatchStream<K>, what: &str, timeout: Duration, check: F) -> Result<K, DevError>
where
    F: FnMut(ChangeType, &K) -> Verdict,
{
    run_wait(stream, what, Some(timeout), check).await
}

fn pod_verdict(change: ChangeType, pod: &Pod) -> Verdict {
    if change == ChangeType::Deleted {
        return Verdict::Pending;
    }
    match pod.status.as_ref().and_then(|s| s.phase.as_deref()) {
        Some("Running") => Verdict::Satisfied,
        Some(phase @ ("Failed" | "Unknown")) => {
            let reason = pod
                .status
                .as_ref()
                .and_then(|s| s.message.clone())
                .unwrap_or_default();
            Verdict::Failed(format!("pod {} is {} {}", pod.name_any(), phase, reason).trim_end().to_string())
        }
        _ => Verdict::Pending,
    }
}

fn build_verdict(change: ChangeType, build: &Build) -> Verdict {
    if change == ChangeType::Deleted {
        return Verdict::Failed(format!("build {} was deleted", build.name_any()));
    }
    match build.phase() {
        BuildPhase::Complete => Verdict::Satisfied,
        phase @ (BuildPhase::Failed | BuildPhase::Error | BuildPhase::Cancelled) => {
            let message = build
                .status
                .as_ref()
                .and_then(|s| s.message.as_deref())
                .map(|m| format!(": {}", m))
                .unwrap_or_default();
            Verdict::Failed(format!("build {} {}{}", build.name_any(), phase, message))
        }
        _ => Verdict::Pending,
    }
}

/// Aborts the wrapped task when dropped
struct AbortOnDrop(tokio::task::AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Waits on cluster resources through a shared client handle
#[derive(Clone)]
pub struct ConditionWatcher {
    client: Arc<dyn ClusterClient>,
    settings: Settings,
}

impl std::fmt::Debug for ConditionWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionWatcher")
            .field("namespace", &self.client.namespace())
            .finish_non_exhaustive()
    }
}

impl ConditionWatcher {
    pub fn new(client: Arc<dyn ClusterClient>, settings: Settings) -> Self {
        Self { client, settings }
    }

    /// Block until the named workload satisfies `condition`.
    ///
    /// Confirms that an update has propagated, not just that it was accepted.
    pub async fn wait_for_workload(&self, name: &str, condition: &Condition) -> Result<DeploymentConfig, DevError> {
        let what = format!("DeploymentConfig {}", name);
        let stream = self.client.watch_deployment_configs(&Selector::name(name)).await?;
        await_condition(stream, &what, condition.timeout, |change, dc: &DeploymentConfig| {
            if change == ChangeType::Deleted {
                return Verdict::Failed("deleted while waiting".to_string());
            }
            condition.evaluate(dc)
        })
        .await
    }

    /// Block until a pod matching `selector` is Running.
    ///
    /// A Failed or Unknown pod fails the wait immediately. The event fold
    /// runs in a background task feeding a result channel; the caller races
    /// that channel against the pod timeout.
    pub async fn wait_for_running_pod(&self, selector: &str) -> Result<Pod, DevError> {
        let timeout = self.settings.pod_timeout;
        let what = format!("pod matching {}", selector);
        info!("Waiting for a running {}", what);

        let stream = self.client.watch_pods(&Selector::labels(selector)).await?;
        let (tx, rx) = oneshot::channel();
        let task_what = what.clone();
        let task = tokio::spawn(async move {
            let result = run_wait(stream, &task_what, None, pod_verdict).await;
            // Receiver gone means the caller timed out
            let _ = tx.send(result);
        });
        let _guard = AbortOnDrop(task.abort_handle());

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(DevError::WatchTerminated {
                what,
                reason: "watch task ended without a result".to_string(),
            }),
            Err(_) => {
                warn!("Timed out after {:?} waiting for {}", timeout, what);
                Err(DevError::Timeout { what, after: timeout })
            }
        }
    }

    /// Block until the named secret exists
    pub async fn wait_for_secret(&self, name: &str) -> Result<Secret, DevError> {
        let what = format!("Secret {}", name);
        let stream = self.client.watch_secrets(&Selector::name(name)).await?;
        await_condition(stream, &what, self.settings.secret_timeout, |change, _: &Secret| {
            if change == ChangeType::Deleted { Verdict::Pending } else { Verdict::Satisfied }
        })
        .await
    }

    /// Block until the named build finishes.
    ///
    /// Complete is success; Failed, Error and Cancelled are failures.
    pub async fn wait_for_build(&self, name: &str) -> Result<Build, DevError> {
        let what = format!("Build {}", name);
        info!("Waiting for {} to finish", what);
        let stream = self.client.watch_builds(&Selector::name(name)).await?;
        await_condition(stream, &what, self.settings.build_timeout, build_verdict).await
    }

    /// Block until a DELETED event is seen for the named claim.
    ///
    /// The watch is opened before checking existence, so a deletion that
    /// lands between the two calls is still observed.
    pub async fn wait_for_claim_deletion(&self, name: &str) -> Result<(), DevError> {
        let what = format!("deletion of PersistentVolumeClaim {}", name);
        let stream = self.client.watch_pvcs(&Selector::name(name)).await?;
        match self.client.get_pvc(name).await {
            Err(err) if err.is_not_found() => {
                debug!("PersistentVolumeClaim {} already gone", name);
                return Ok(());
            }
            Err(err) => return Err(err.into()),
            Ok(_) => {}
        }
        await_condition(stream, &what, self.settings.delete_timeout, |change, _| {
            if change == ChangeType::Deleted { Verdict::Satisfied } else { Verdict::Pending }
        })
        .await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "condition_test.rs"]
mod tests;

//! Retry-on-conflict for fetch-modify-write cycles

use std::future::Future;

use tracing::{debug, warn};

use crate::backoff::ConflictBackoff;
use crate::error::{DevError, ErrorKind};

/// Run `attempt` until it stops failing with a conflict or the schedule runs out.
///
/// `attempt` must re-fetch the resource it writes; a value read on a failed
/// attempt is never reused. Exhaustion is reported as
/// [`DevError::Conflict`] naming the resource.
pub async fn retry_on_conflict<T, F, Fut>(
    mut backoff: ConflictBackoff,
    kind: &'static str,
    name: &str,
    mut attempt: F,
) -> Result<T, DevError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DevError>>,
{
    backoff.reset();
    let mut attempts = 0;
    loop {
        attempts += 1;
        match attempt().await {
            Err(err) if err.kind() == ErrorKind::Conflict => match backoff.next_delay() {
                Some(delay) => {
                    debug!("Conflict updating {} {} (attempt {}), retrying in {:?}", kind, name, attempts, delay);
                    tokio::time::sleep(delay).await;
                }
                None => {
                    warn!("Giving up on {} {} after {} conflicting attempts", kind, name, attempts);
                    return Err(DevError::Conflict {
                        kind,
                        name: name.to_string(),
                        attempts,
                    });
                }
            },
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cluster_client::ClusterError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn conflict() -> DevError {
        ClusterError::Conflict {
            kind: "DeploymentConfig",
            name: "web".to_string(),
        }
        .into()
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = retry_on_conflict(ConflictBackoff::default(), "DeploymentConfig", "web", move || async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(conflict())
            } else {
                Ok("done")
            }
        })
        .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_names_resource() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let err = retry_on_conflict(ConflictBackoff::new(10, 100, 3), "DeploymentConfig", "web", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(conflict())
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match err {
            DevError::Conflict { kind, name, attempts } => {
                assert_eq!(kind, "DeploymentConfig");
                assert_eq!(name, "web");
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let err = retry_on_conflict(ConflictBackoff::default(), "DeploymentConfig", "web", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(DevError::Invalid("bad".to_string()))
        })
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invalid);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

//! Operation settings
//!
//! Plain values handed to the core by the binary's configuration layer.

use std::time::Duration;

use crate::backoff::ConflictBackoff;

/// Default wait for a patched workload to converge
pub const DEFAULT_UPDATE_TIMEOUT: Duration = Duration::from_secs(120);
/// Default wait for a component pod to reach Running
pub const DEFAULT_POD_TIMEOUT: Duration = Duration::from_secs(120);
/// Default wait for a build to finish
pub const DEFAULT_BUILD_TIMEOUT: Duration = Duration::from_secs(1800);
/// Default wait for a secret to appear
pub const DEFAULT_SECRET_TIMEOUT: Duration = Duration::from_secs(120);
/// Default wait for a claim deletion to be observed
pub const DEFAULT_DELETE_TIMEOUT: Duration = Duration::from_secs(60);
/// Size of the dev-mode app data claim
pub const DEFAULT_CLAIM_SIZE: &str = "1Gi";
/// Image that carries the supervisor binary staged by dev mode
pub const DEFAULT_SUPERVISOR_IMAGE: &str = "quay.io/devloop/supervisord:0.3.0";

/// Timeouts, sizes and retry policy shared by the core operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub update_timeout: Duration,
    pub pod_timeout: Duration,
    pub build_timeout: Duration,
    pub secret_timeout: Duration,
    pub delete_timeout: Duration,
    pub claim_size: String,
    pub supervisor_image: String,
    pub backoff: ConflictBackoff,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            update_timeout: DEFAULT_UPDATE_TIMEOUT,
            pod_timeout: DEFAULT_POD_TIMEOUT,
            build_timeout: DEFAULT_BUILD_TIMEOUT,
            secret_timeout: DEFAULT_SECRET_TIMEOUT,
            delete_timeout: DEFAULT_DELETE_TIMEOUT,
            claim_size: DEFAULT_CLAIM_SIZE.to_string(),
            supervisor_image: DEFAULT_SUPERVISOR_IMAGE.to_string(),
            backoff: ConflictBackoff::default(),
        }
    }
}

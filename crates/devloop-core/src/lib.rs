//! devloop core
//!
//! The three pieces every developer command is built from:
//!
//! - [`condition`] - block until a watched resource reaches a state, with a
//!   bounded timeout
//! - [`workload`] - reshape a live DeploymentConfig between build mode and
//!   dev mode, keeping customisations made on the cluster
//! - [`sync`] - stream local files into a running container as a tar archive
//!
//! [`component::Components`] composes them into rebuild, push and mode
//! switch operations.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use cluster_client::{ClusterClient, KubeClusterClient};
//! use devloop_core::{Components, Settings};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client: Arc<dyn ClusterClient> = Arc::new(KubeClusterClient::try_default(None).await?);
//! let components = Components::new(client, Settings::default());
//!
//! components.to_dev_mode("frontend", "openshift/nodejs:14").await?;
//! components.push("frontend", Path::new("./frontend"), &[]).await?;
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod component;
pub mod condition;
pub mod error;
pub mod image;
pub mod retry;
pub mod settings;
pub mod sync;
pub mod workload;

#[cfg(test)]
mod test_utils;

pub use backoff::ConflictBackoff;
pub use component::Components;
pub use condition::{Condition, ConditionWatcher, Verdict, await_condition};
pub use error::{DevError, ErrorKind, ResultExt};
pub use image::{BuilderImage, ImageReference};
pub use settings::Settings;
pub use sync::{SyncTransport, TransferManifest};
pub use workload::{ComponentMeta, WorkloadPatcher};

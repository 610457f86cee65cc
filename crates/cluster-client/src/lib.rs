//! Cluster Resource Client
//!
//! Typed operations against the resource collections devloop needs in a
//! single namespace: deployment configs, pods, secrets, builds, persistent
//! volume claims and image stream tags, plus pod exec.
//!
//! # Example
//!
//! ```no_run
//! use cluster_client::{ClusterClient, KubeClusterClient, Selector};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = KubeClusterClient::try_default(None).await?;
//!
//! let dc = client.get_deployment_config("frontend").await?;
//! let pods = client
//!     .list_pods(&Selector::labels("deploymentconfig=frontend"))
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! The concrete [`KubeClusterClient`] talks to a live API server. With the
//! `test-util` feature, [`MockClusterClient`] keeps everything in memory and
//! replays watch events the way the API server does.

pub mod client;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod cluster_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::KubeClusterClient;
pub use cluster_trait::ClusterClient;
pub use error::ClusterError;
pub use models::*;
#[cfg(feature = "test-util")]
pub use mock::{ExecCall, MockClusterClient};

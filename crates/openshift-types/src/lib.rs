//! OpenShift resource types
//!
//! Typed definitions for the OpenShift API groups devloop talks to.
//! These are not CRDs we own, so schema generation is disabled; the
//! `CustomResource` derive is only used for its `kube::Resource` impl
//! and the `metadata`/`spec`/`status` envelope.

pub mod build;
pub mod deployment_config;

pub use build::*;
pub use deployment_config::*;

//! Shared client models
//!
//! Watch events, selectors and exec results exchanged between the cluster
//! client and its callers.

use futures::stream::BoxStream;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::pin::Pin;
use tokio::io::AsyncRead;

use crate::error::ClusterError;

/// Kind of change carried by a watch event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    Added,
    Modified,
    Deleted,
    Error,
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeType::Added => "ADDED",
            ChangeType::Modified => "MODIFIED",
            ChangeType::Deleted => "DELETED",
            ChangeType::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// One event from a watch subscription
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent<K> {
    Added(K),
    Modified(K),
    Deleted(K),
    /// Server-side error event; the stream should be considered dead
    Error(String),
}

impl<K> WatchEvent<K> {
    /// Change type of this event
    pub fn change_type(&self) -> ChangeType {
        match self {
            WatchEvent::Added(_) => ChangeType::Added,
            WatchEvent::Modified(_) => ChangeType::Modified,
            WatchEvent::Deleted(_) => ChangeType::Deleted,
            WatchEvent::Error(_) => ChangeType::Error,
        }
    }

    /// Snapshot carried by the event, if any
    pub fn object(&self) -> Option<&K> {
        match self {
            WatchEvent::Added(k) | WatchEvent::Modified(k) | WatchEvent::Deleted(k) => Some(k),
            WatchEvent::Error(_) => None,
        }
    }
}

/// Ordered event stream for one subscription; dropping it closes the watch
pub type WatchStream<K> = BoxStream<'static, Result<WatchEvent<K>, ClusterError>>;

/// Scope of a list or watch call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// Exactly one object by name (`metadata.name=<name>`)
    Name(String),
    /// Label selector in `k=v,k2=v2` form
    Labels(String),
}

impl Selector {
    pub fn name(name: impl Into<String>) -> Self {
        Selector::Name(name.into())
    }

    pub fn labels(selector: impl Into<String>) -> Self {
        Selector::Labels(selector.into())
    }

    /// Whether an object with this name and these labels is in scope.
    ///
    /// Only equality terms are understood; that is all devloop emits.
    pub fn matches(&self, name: &str, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Selector::Name(n) => n == name,
            Selector::Labels(sel) => sel
                .split(',')
                .map(str::trim)
                .filter(|term| !term.is_empty())
                .all(|term| match term.split_once('=') {
                    Some((k, v)) => labels.get(k.trim()).map(String::as_str) == Some(v.trim()),
                    None => labels.contains_key(term),
                }),
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Name(n) => write!(f, "metadata.name={}", n),
            Selector::Labels(l) => f.write_str(l),
        }
    }
}

/// Captured output of a remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Stdin source handed to [`exec`](crate::ClusterClient::exec)
pub type BoxedAsyncRead = Pin<Box<dyn AsyncRead + Send>>;

/// Builder image metadata resolved from an image stream tag
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageMetadata {
    /// Image reference the tag currently points at
    pub docker_image_reference: Option<String>,
    /// Exposed ports as declared by the image, e.g. `8080/tcp`
    pub exposed_ports: Vec<String>,
    /// Image labels
    pub labels: BTreeMap<String, String>,
}

impl ImageMetadata {
    /// Extract metadata from a raw `ImageStreamTag` body.
    ///
    /// Exposed ports are returned sorted so the result does not depend on
    /// JSON map ordering.
    pub fn from_image_stream_tag(tag: &Value) -> Self {
        let image = &tag["image"];
        let config = &image["dockerImageMetadata"]["Config"];

        let mut exposed_ports: Vec<String> = config["ExposedPorts"]
            .as_object()
            .map(|ports| ports.keys().cloned().collect())
            .unwrap_or_default();
        exposed_ports.sort();

        let labels = config["Labels"]
            .as_object()
            .map(|labels| {
                labels
                    .iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        ImageMetadata {
            docker_image_reference: image["dockerImageReference"].as_str().map(str::to_string),
            exposed_ports,
            labels,
        }
    }
}

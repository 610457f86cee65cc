//! Image references and builder image metadata

use std::fmt;

use cluster_client::ImageMetadata;
use k8s_openapi::api::core::v1::ContainerPort;

use crate::error::DevError;
use crate::workload::ports::parse_port;

/// Label naming the S2I scripts location
pub const S2I_SCRIPTS_URL_LABEL: &str = "io.openshift.s2i.scripts-url";
/// Label naming where sources or binaries are placed
pub const S2I_SRC_OR_BIN_LABEL: &str = "io.openshift.s2i.destination";
/// Deployment directory labels, in lookup order
pub const S2I_DEPLOYMENTS_DIR_LABELS: [&str; 2] = ["com.redhat.deployments-dir", "org.jboss.deployments-dir"];
/// Source/binary path when the image does not declare one
pub const DEFAULT_S2I_SRC_OR_BIN_PATH: &str = "/tmp";

/// Parsed `[namespace/]name[:tag|@digest]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub namespace: Option<String>,
    pub name: String,
    /// `latest` when neither tag nor digest is given
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl ImageReference {
    pub fn parse(image: &str) -> Result<Self, DevError> {
        let invalid = || DevError::Invalid(format!("invalid image reference {}", image));

        let (path, tag, digest) = match image.split_once('@') {
            Some((path, digest)) => {
                if digest.is_empty() || digest.contains('@') {
                    return Err(invalid());
                }
                (path, None, Some(digest.to_string()))
            }
            None => match image.split_once(':') {
                Some((path, tag)) => {
                    if tag.is_empty() || tag.contains(':') {
                        return Err(invalid());
                    }
                    (path, Some(tag.to_string()), None)
                }
                None => (image, Some("latest".to_string()), None),
            },
        };

        let (namespace, name) = match path.split_once('/') {
            Some((ns, name)) => (Some(ns.to_string()), name),
            None => (None, path),
        };
        if name.is_empty() || name.contains('/') || namespace.as_deref() == Some("") {
            return Err(invalid());
        }

        Ok(Self {
            namespace,
            name: name.to_string(),
            tag,
            digest,
        })
    }

    /// `name:tag` used to look up the image stream tag
    pub fn stream_tag(&self) -> String {
        match (&self.tag, &self.digest) {
            (_, Some(digest)) => format!("{}@{}", self.name, digest),
            (Some(tag), None) => format!("{}:{}", self.name, tag),
            (None, None) => format!("{}:latest", self.name),
        }
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ns) = &self.namespace {
            write!(f, "{}/", ns)?;
        }
        f.write_str(&self.stream_tag())
    }
}

/// Where the S2I scripts live and how the supervisor should reach them
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct S2IPaths {
    /// `image://`, `file://` or `http(s)://`
    pub scripts_protocol: String,
    pub scripts_url: String,
    pub src_or_bin_path: String,
    pub deployment_dir: String,
}

/// Builder image: its reference plus resolved metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuilderImage {
    pub reference: ImageReference,
    pub metadata: ImageMetadata,
}

impl BuilderImage {
    /// Container ports for every port the image exposes
    pub fn exposed_ports(&self) -> Result<Vec<ContainerPort>, DevError> {
        self.metadata
            .exposed_ports
            .iter()
            .map(|p| {
                if p.split('/').count() != 2 {
                    return Err(DevError::Invalid(format!("invalid exposed port {}", p)));
                }
                parse_port(p)
            })
            .collect()
    }

    /// S2I locations from the image labels
    pub fn s2i_paths(&self) -> Result<S2IPaths, DevError> {
        let labels = &self.metadata.labels;
        if labels.is_empty() {
            return Ok(S2IPaths::default());
        }

        let src_or_bin_path = labels
            .get(S2I_SRC_OR_BIN_LABEL)
            .filter(|v| !v.is_empty())
            .cloned()
            .unwrap_or_else(|| DEFAULT_S2I_SRC_OR_BIN_PATH.to_string());
        let deployment_dir = S2I_DEPLOYMENTS_DIR_LABELS
            .iter()
            .find_map(|label| labels.get(*label))
            .cloned()
            .unwrap_or_default();

        let url = labels.get(S2I_SCRIPTS_URL_LABEL).map(String::as_str).unwrap_or_default();
        let (scripts_protocol, scripts_url) = if let Some(path) = url.strip_prefix("image://") {
            ("image://", path.to_string())
        } else if let Some(path) = url.strip_prefix("file://") {
            ("file://", path.to_string())
        } else if url.starts_with("http://") || url.starts_with("https://") {
            ("http(s)://", url.to_string())
        } else {
            return Err(DevError::Invalid(format!("unknown scripts url {:?}", url)));
        };

        Ok(S2IPaths {
            scripts_protocol: scripts_protocol.to_string(),
            scripts_url,
            src_or_bin_path,
            deployment_dir,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::nodejs_image;
    use std::collections::BTreeMap;

    #[test]
    fn test_parse_image_reference_forms() {
        let plain = ImageReference::parse("nodejs").unwrap();
        assert_eq!(plain.namespace, None);
        assert_eq!(plain.tag.as_deref(), Some("latest"));

        let tagged = ImageReference::parse("openshift/nodejs:10").unwrap();
        assert_eq!(tagged.namespace.as_deref(), Some("openshift"));
        assert_eq!(tagged.name, "nodejs");
        assert_eq!(tagged.stream_tag(), "nodejs:10");

        let pinned = ImageReference::parse("nodejs@sha256:abc").unwrap();
        assert_eq!(pinned.tag, None);
        assert_eq!(pinned.digest.as_deref(), Some("sha256:abc"));
        assert_eq!(pinned.to_string(), "nodejs@sha256:abc");
    }

    #[test]
    fn test_parse_image_reference_rejects_malformed() {
        for bad in ["", ":1.0", "a/b/c", "nodejs@", "/nodejs", "a:b:c"] {
            assert!(ImageReference::parse(bad).is_err(), "{}", bad);
        }
    }

    #[test]
    fn test_exposed_ports_from_metadata() {
        let builder = BuilderImage {
            reference: ImageReference::parse("nodejs").unwrap(),
            metadata: nodejs_image(),
        };
        let ports = builder.exposed_ports().unwrap();
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].container_port, 8080);
        assert_eq!(ports[0].protocol.as_deref(), Some("TCP"));
    }

    #[test]
    fn test_s2i_paths_from_labels() {
        let builder = BuilderImage {
            reference: ImageReference::parse("nodejs").unwrap(),
            metadata: nodejs_image(),
        };
        let paths = builder.s2i_paths().unwrap();
        assert_eq!(paths.scripts_protocol, "image://");
        assert_eq!(paths.scripts_url, "/usr/libexec/s2i");
        assert_eq!(paths.src_or_bin_path, "/opt/app-root");
        assert_eq!(paths.deployment_dir, "");
    }

    #[test]
    fn test_s2i_paths_defaults_and_unknown_protocol() {
        let mut metadata = ImageMetadata {
            labels: BTreeMap::from([
                (S2I_SCRIPTS_URL_LABEL.to_string(), "https://example.com/s2i".to_string()),
                ("org.jboss.deployments-dir".to_string(), "/deployments".to_string()),
            ]),
            ..Default::default()
        };
        let builder = BuilderImage {
            reference: ImageReference::parse("wildfly").unwrap(),
            metadata: metadata.clone(),
        };
        let paths = builder.s2i_paths().unwrap();
        assert_eq!(paths.scripts_protocol, "http(s)://");
        assert_eq!(paths.scripts_url, "https://example.com/s2i");
        assert_eq!(paths.src_or_bin_path, "/tmp");
        assert_eq!(paths.deployment_dir, "/deployments");

        metadata
            .labels
            .insert(S2I_SCRIPTS_URL_LABEL.to_string(), "ftp://nope".to_string());
        let builder = BuilderImage { metadata, ..builder };
        assert!(builder.s2i_paths().is_err());
    }
}

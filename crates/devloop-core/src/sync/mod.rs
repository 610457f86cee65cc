//! File Synchronization Transport
//!
//! Packs local changes into a tar stream and unpacks it inside a running
//! container through exec. The archive is produced on a blocking thread into
//! a bounded duplex pipe while the exec call drains the other end, so memory
//! stays bounded by the pipe regardless of transfer size.
//!
//! - `manifest.rs` - which paths are sent and under what names
//! - `archive.rs` - the tar producer

mod archive;
mod manifest;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cluster_client::{ClusterClient, ExecOutput};
use tokio_util::io::SyncIoBridge;
use tracing::{debug, info, warn};

use crate::error::DevError;

pub use archive::write_archive;
pub use manifest::{EntryKind, ManifestEntry, TransferManifest, TransferMode, entry_name};

/// Duplex buffer between the tar producer and the exec stdin
pub const PIPE_CAPACITY: usize = 64 * 1024;

fn join_error(err: tokio::task::JoinError) -> DevError {
    DevError::Io(io::Error::other(err))
}

/// The reading end of the pipe went away before the archive was written
fn is_hang_up(err: &DevError) -> bool {
    match err {
        DevError::Malformed { source, .. } | DevError::Io(source) => source.kind() == io::ErrorKind::BrokenPipe,
        _ => false,
    }
}

/// Pushes local files into pods
#[derive(Clone)]
pub struct SyncTransport {
    client: Arc<dyn ClusterClient>,
}

impl std::fmt::Debug for SyncTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncTransport")
            .field("namespace", &self.client.namespace())
            .finish()
    }
}

impl SyncTransport {
    pub fn new(client: Arc<dyn ClusterClient>) -> Self {
        Self { client }
    }

    /// Copy `changed` (or the whole of `local_root`) into `target_path` on `pod`.
    ///
    /// Relative changed paths resolve against `local_root`. The result is
    /// whichever side fails first; an archive failure truncates the remote
    /// stream and is reported as `Malformed`. A producer that only failed
    /// because the remote stopped reading defers to the exec result.
    pub async fn push_files(
        &self,
        local_root: &Path,
        pod: &str,
        target_path: &str,
        changed: &[PathBuf],
    ) -> Result<TransferManifest, DevError> {
        let root = local_root.to_path_buf();
        let changed = changed.to_vec();
        let manifest = tokio::task::spawn_blocking(move || TransferManifest::build(&root, &changed))
            .await
            .map_err(join_error)??;

        let command = manifest.unpack_command(target_path);
        info!(
            "Pushing {} entries from {} to {}:{}",
            manifest.entries.len(),
            local_root.display(),
            pod,
            target_path
        );

        let (reader, writer) = tokio::io::duplex(PIPE_CAPACITY);
        let bridge = SyncIoBridge::new(writer);
        let producer_manifest = manifest.clone();
        let producer = tokio::task::spawn_blocking(move || {
            // The bridge is dropped on return, which closes the pipe
            write_archive(&producer_manifest, bridge).map(drop)
        });

        let produce = async {
            match producer.await.map_err(join_error)? {
                Ok(()) => Ok(None),
                Err(err) if is_hang_up(&err) => {
                    debug!("Remote end of {} closed before the archive was complete", pod);
                    Ok(Some(err))
                }
                Err(err) => {
                    warn!("Archive for {} failed, remote stream truncated: {}", pod, err);
                    Err(err)
                }
            }
        };
        let transmit = async {
            self.client
                .exec(pod, None, &command, Some(Box::pin(reader)), false)
                .await
                .map_err(DevError::from)
        };
        let context = || format!("push to pod {}", pod);
        let (hang_up, output) = tokio::try_join!(produce, transmit).map_err(|e| e.context(context()))?;
        // The remote exited cleanly without reading everything
        if let Some(err) = hang_up {
            return Err(err.context(context()));
        }
        log_output(pod, &output);

        Ok(manifest)
    }
}

fn log_output(pod: &str, output: &ExecOutput) {
    if !output.stdout.is_empty() {
        debug!("tar on {} stdout: {}", pod, output.stdout.trim_end());
    }
    if !output.stderr.is_empty() {
        debug!("tar on {} stderr: {}", pod, output.stderr.trim_end());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::test_utils::{mock_client, pod};
    use std::fs;

    fn archive_names(bytes: &[u8]) -> Vec<String> {
        let mut archive = tar::Archive::new(bytes);
        let names = archive
            .entries()
            .unwrap()
            .map(|e| {
                let e = e.unwrap();
                e.path().unwrap().to_string_lossy().trim_end_matches('/').to_string()
            })
            .collect();
        names
    }

    #[tokio::test]
    async fn test_push_single_file() {
        let (mock, client) = mock_client();
        mock.add_pod(pod("web-1", "web", Some("Running")));
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a")).unwrap();
        fs::write(dir.path().join("a/b.txt"), "hello").unwrap();

        let transport = SyncTransport::new(client);
        let manifest = transport
            .push_files(dir.path(), "web-1", "/tmp/src", &[PathBuf::from("a/b.txt")])
            .await
            .unwrap();
        assert_eq!(manifest.mode, TransferMode::SingleFile);

        let calls = mock.exec_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].command, vec!["tar", "xf", "-", "-C", "/tmp/src"]);
        assert!(!calls[0].tty);
        assert_eq!(archive_names(&calls[0].stdin), vec!["b.txt"]);
    }

    #[tokio::test]
    async fn test_push_tree_streams_every_entry() {
        let (mock, client) = mock_client();
        mock.add_pod(pod("web-1", "web", Some("Running")));
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("shop");
        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(root.join("package.json"), "{}").unwrap();
        fs::write(root.join("src/server.js"), "require('http')").unwrap();
        // Larger than the pipe so the producer has to wait on the reader
        fs::write(root.join("bundle.bin"), vec![7u8; PIPE_CAPACITY * 4]).unwrap();

        let transport = SyncTransport::new(client);
        transport.push_files(&root, "web-1", "/tmp/src", &[]).await.unwrap();

        let calls = mock.exec_calls();
        assert_eq!(calls[0].command.last().map(String::as_str), Some("1"));
        assert_eq!(
            archive_names(&calls[0].stdin),
            vec!["shop", "shop/bundle.bin", "shop/package.json", "shop/src", "shop/src/server.js"]
        );
        assert!(archive_names(&calls[0].stdin).iter().all(|n| !n.contains('\\')));
    }

    #[tokio::test]
    async fn test_push_missing_root_is_malformed() {
        let (mock, client) = mock_client();
        mock.add_pod(pod("web-1", "web", Some("Running")));
        let dir = tempfile::tempdir().unwrap();

        let transport = SyncTransport::new(client);
        let err = transport
            .push_files(&dir.path().join("absent"), "web-1", "/tmp/src", &[])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Malformed);
        assert!(mock.exec_calls().is_empty());
    }

    #[tokio::test]
    async fn test_push_reports_exec_failure() {
        let (mock, client) = mock_client();
        mock.add_pod(pod("web-1", "web", Some("Running")));
        mock.fail_next_exec("tar: /tmp/src: Cannot open: No such file or directory");
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("x.txt"), "x").unwrap();

        let transport = SyncTransport::new(client);
        let err = transport
            .push_files(dir.path(), "web-1", "/tmp/src", &[PathBuf::from("x.txt")])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cluster);
        assert!(err.to_string().contains("push to pod web-1"));
    }

    #[tokio::test]
    async fn test_remote_hang_up_reports_remote_failure() {
        let (mock, client) = mock_client();
        mock.add_pod(pod("web-1", "web", Some("Running")));
        mock.hang_up_next_exec("tar: write error: No space left on device");
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("shop");
        fs::create_dir(&root).unwrap();
        fs::write(root.join("bundle.bin"), vec![7u8; PIPE_CAPACITY * 4]).unwrap();

        let transport = SyncTransport::new(client);
        let err = transport.push_files(&root, "web-1", "/tmp/src", &[]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cluster);
        assert!(err.to_string().contains("No space left on device"));
        assert!(mock.exec_calls()[0].stdin.is_empty());
    }

    #[tokio::test]
    async fn test_push_to_unknown_pod_is_not_found() {
        let (_mock, client) = mock_client();
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("x.txt"), "x").unwrap();

        let transport = SyncTransport::new(client);
        let err = transport
            .push_files(dir.path(), "ghost", "/tmp/src", &[PathBuf::from("x.txt")])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}

//! Polling watch: scan mtimes every interval, push what changed

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use devloop_core::Components;
use tokio::time::{Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::error::CliError;

/// Directories never pushed
const IGNORED_DIRS: [&str; 2] = [".git", ".devloop"];

/// Modification time of every regular file under a root, keyed by the path
/// relative to that root
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot(BTreeMap<PathBuf, SystemTime>);

impl Snapshot {
    /// Walk `root` without following symlinks
    pub fn scan(root: &Path) -> Result<Self, CliError> {
        let mut files = BTreeMap::new();
        let walker = WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !IGNORED_DIRS.iter().any(|d| e.file_name() == *d));
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                // Deleted between readdir and stat
                Err(err) if err.io_error().is_some_and(|e| e.kind() == std::io::ErrorKind::NotFound) => continue,
                Err(err) => return Err(std::io::Error::other(err).into()),
            };
            if entry.file_type().is_dir() {
                continue;
            }
            let modified = entry.metadata().ok().and_then(|m| m.modified().ok());
            if let Some(modified) = modified {
                let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
                files.insert(relative.to_path_buf(), modified);
            }
        }
        Ok(Self(files))
    }

    /// Paths added, modified or removed since `previous`
    pub fn changes_since(&self, previous: &Snapshot) -> Vec<PathBuf> {
        let mut changed: Vec<PathBuf> = self
            .0
            .iter()
            .filter(|(path, time)| previous.0.get(*path) != Some(*time))
            .map(|(path, _)| path.clone())
            .collect();
        changed.extend(previous.0.keys().filter(|p| !self.0.contains_key(*p)).cloned());
        changed.sort();
        changed
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

async fn scan_blocking(root: &Path) -> Result<Snapshot, CliError> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || Snapshot::scan(&root))
        .await
        .map_err(|e| CliError::Io(std::io::Error::other(e)))?
}

/// Push changes under `local_root` into `component` until interrupted.
///
/// A failed push is logged and retried with the next batch of changes.
pub async fn run(components: &Components, component: &str, local_root: &Path, interval: Duration) -> Result<(), CliError> {
    let mut previous = scan_blocking(local_root).await?;
    info!("Watching {} ({} files) for {}, every {:?}", local_root.display(), previous.len(), component, interval);

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Stopping watch of {}", local_root.display());
                return Ok(());
            }
            _ = ticker.tick() => {}
        }

        let current = scan_blocking(local_root).await?;
        let changed = current.changes_since(&previous);
        if changed.is_empty() {
            continue;
        }
        debug!("Changed: {:?}", changed);
        info!("Pushing {} changed paths to {}", changed.len(), component);
        match components.push(component, local_root, &changed).await {
            Ok(manifest) => {
                info!("Pushed {} entries to {}", manifest.entries.len(), component);
                previous = current;
            }
            Err(err) if err.kind() == devloop_core::ErrorKind::Malformed => {
                warn!("Skipping unreadable change set: {}", err);
                previous = current;
            }
            Err(err) => error!("Push to {} failed, will retry: {}", component, err),
        }
    }
}

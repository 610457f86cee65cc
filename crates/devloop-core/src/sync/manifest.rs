//! Which local paths go into one push, and under what names

use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::error::DevError;

/// How the archive maps onto the target directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    /// One file, stored under its base name
    SingleFile,
    /// The whole local root, stored under its own root segment
    Subtree,
}

/// What an entry is on the local filesystem
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    /// Stored as a link; the target is never followed
    Symlink,
}

/// One archive entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub source: PathBuf,
    /// Archive name, always `/`-separated
    pub name: String,
    pub kind: EntryKind,
}

/// Archive entries computed for one push
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferManifest {
    pub mode: TransferMode,
    pub entries: Vec<ManifestEntry>,
}

/// Join path components with `/`, normalising any backslashes
pub fn entry_name(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().replace('\\', "/")),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn malformed(path: &Path, source: io::Error) -> DevError {
    DevError::Malformed {
        path: path.to_path_buf(),
        source,
    }
}

fn kind_of(file_type: std::fs::FileType) -> Option<EntryKind> {
    if file_type.is_symlink() {
        Some(EntryKind::Symlink)
    } else if file_type.is_dir() {
        Some(EntryKind::Dir)
    } else if file_type.is_file() {
        Some(EntryKind::File)
    } else {
        None
    }
}

/// Base name of the local root, resolving `.` and friends first
fn root_segment(local_root: &Path) -> Result<String, DevError> {
    if let Some(name) = local_root.file_name() {
        return Ok(name.to_string_lossy().into_owned());
    }
    let resolved = local_root.canonicalize().map_err(|e| malformed(local_root, e))?;
    Ok(resolved
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "root".to_string()))
}

fn without_cur_dir(path: &Path) -> PathBuf {
    path.components().filter(|c| *c != Component::CurDir).collect()
}

/// Resolve a changed path against the local root.
///
/// Relative paths are taken relative to `local_root`. When that names
/// nothing and `local_root` is itself relative, a path that already starts
/// with it (as a walk of the root reports it) is used as given.
fn resolve(local_root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    let joined = local_root.join(path);
    if joined.symlink_metadata().is_ok() || local_root.is_absolute() {
        return joined;
    }
    let root = without_cur_dir(local_root);
    if !root.as_os_str().is_empty() && without_cur_dir(path).starts_with(&root) && path.symlink_metadata().is_ok() {
        return path.to_path_buf();
    }
    joined
}

impl TransferManifest {
    /// Compute the manifest for `changed` under `local_root`.
    ///
    /// Exactly one changed path that exists and is not a directory is a
    /// single-file transfer. Anything else walks the whole root, unless every changed
    /// path has disappeared, in which case the manifest is empty.
    pub fn build(local_root: &Path, changed: &[PathBuf]) -> Result<Self, DevError> {
        let resolved: Vec<PathBuf> = changed.iter().map(|p| resolve(local_root, p)).collect();

        if let [single] = resolved.as_slice() {
            if single.symlink_metadata().is_ok_and(|m| !m.is_dir()) {
                return Self::single_file(single);
            }
        }

        if !resolved.is_empty() && !resolved.iter().any(|p| p.symlink_metadata().is_ok()) {
            debug!("None of {} changed paths exist, sending an empty archive", resolved.len());
            return Ok(Self {
                mode: TransferMode::Subtree,
                entries: Vec::new(),
            });
        }
        Self::subtree(local_root)
    }

    fn single_file(path: &Path) -> Result<Self, DevError> {
        let metadata = path.symlink_metadata().map_err(|e| malformed(path, e))?;
        let kind = kind_of(metadata.file_type()).ok_or_else(|| {
            malformed(path, io::Error::new(io::ErrorKind::InvalidInput, "not a regular file or symlink"))
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().replace('\\', "/"))
            .ok_or_else(|| malformed(path, io::Error::new(io::ErrorKind::InvalidInput, "path has no file name")))?;
        Ok(Self {
            mode: TransferMode::SingleFile,
            entries: vec![ManifestEntry {
                source: path.to_path_buf(),
                name,
                kind,
            }],
        })
    }

    fn subtree(local_root: &Path) -> Result<Self, DevError> {
        let segment = root_segment(local_root)?;
        let mut entries = Vec::new();
        for item in WalkDir::new(local_root).follow_links(false).sort_by_file_name() {
            let item = item.map_err(|e| {
                let path = e.path().unwrap_or(local_root).to_path_buf();
                let source = e.into_io_error().unwrap_or_else(|| io::Error::other("filesystem loop"));
                malformed(&path, source)
            })?;
            let Some(kind) = kind_of(item.file_type()) else {
                debug!("Skipping special file {}", item.path().display());
                continue;
            };
            let relative = item.path().strip_prefix(local_root).unwrap_or(item.path());
            let name = if item.depth() == 0 {
                segment.clone()
            } else {
                format!("{}/{}", segment, entry_name(relative))
            };
            entries.push(ManifestEntry {
                source: item.path().to_path_buf(),
                name,
                kind,
            });
        }
        Ok(Self {
            mode: TransferMode::Subtree,
            entries,
        })
    }

    /// Remote command that unpacks this archive into `target`
    pub fn unpack_command(&self, target: &str) -> Vec<String> {
        let mut command: Vec<String> = ["tar", "xf", "-", "-C", target].iter().map(|s| s.to_string()).collect();
        if self.mode == TransferMode::Subtree {
            command.extend(["--strip".to_string(), "1".to_string()]);
        }
        command
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

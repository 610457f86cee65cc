//! Tar producer for a transfer manifest

use std::io::Write;

use tracing::debug;

use super::manifest::TransferManifest;
use crate::error::DevError;

/// Write every manifest entry into a tar stream on `writer`.
///
/// Symlinks are stored as links with their target. Directories get a header
/// only. Returns the writer once the end-of-archive blocks are written.
pub fn write_archive<W: Write>(manifest: &TransferManifest, writer: W) -> Result<W, DevError> {
    let mut builder = tar::Builder::new(writer);
    builder.follow_symlinks(false);

    for entry in &manifest.entries {
        debug!("Archiving {} as {}", entry.source.display(), entry.name);
        builder
            .append_path_with_name(&entry.source, &entry.name)
            .map_err(|source| DevError::Malformed {
                path: entry.source.clone(),
                source,
            })?;
    }

    let mut writer = builder.into_inner().map_err(|source| DevError::Malformed {
        path: manifest.entries.last().map(|e| e.source.clone()).unwrap_or_default(),
        source,
    })?;
    writer.flush()?;
    Ok(writer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Read;
    use std::path::PathBuf;

    fn read_entries(bytes: &[u8]) -> Vec<(String, tar::EntryType, Vec<u8>)> {
        let mut archive = tar::Archive::new(bytes);
        let entries = archive
            .entries()
            .unwrap()
            .map(|e| {
                let mut e = e.unwrap();
                let name = e.path().unwrap().to_string_lossy().into_owned();
                let kind = e.header().entry_type();
                let mut data = Vec::new();
                e.read_to_end(&mut data).unwrap();
                (name, kind, data)
            })
            .collect();
        entries
    }

    #[test]
    fn test_archive_contains_files_and_directories() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("app");
        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(root.join("src/index.js"), "console.log(1)").unwrap();

        let manifest = TransferManifest::build(&root, &[]).unwrap();
        let bytes = write_archive(&manifest, Vec::new()).unwrap();
        let entries = read_entries(&bytes);

        let names: Vec<_> = entries.iter().map(|(n, _, _)| n.trim_end_matches('/')).collect();
        assert_eq!(names, vec!["app", "app/src", "app/src/index.js"]);
        assert!(entries[0].1.is_dir());
        assert_eq!(entries[2].2, b"console.log(1)");
    }

    #[test]
    fn test_empty_manifest_is_a_valid_archive() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = TransferManifest::build(dir.path(), &[PathBuf::from("gone")]).unwrap();
        let bytes = write_archive(&manifest, Vec::new()).unwrap();
        assert!(!bytes.is_empty());
        assert!(read_entries(&bytes).is_empty());
    }

    #[test]
    fn test_vanished_entry_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "x").unwrap();
        let manifest = TransferManifest::build(dir.path(), &[PathBuf::from("a.txt")]).unwrap();
        fs::remove_file(dir.path().join("a.txt")).unwrap();

        let err = write_archive(&manifest, Vec::new()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Malformed);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_target_is_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("app");
        fs::create_dir(&root).unwrap();
        fs::write(root.join("real.txt"), "x").unwrap();
        std::os::unix::fs::symlink("real.txt", root.join("alias.txt")).unwrap();

        let manifest = TransferManifest::build(&root, &[]).unwrap();
        let bytes = write_archive(&manifest, Vec::new()).unwrap();

        let mut archive = tar::Archive::new(bytes.as_slice());
        let link = archive
            .entries()
            .unwrap()
            .map(Result::unwrap)
            .find(|e| e.path().unwrap().ends_with("alias.txt"))
            .unwrap();
        assert!(link.header().entry_type().is_symlink());
        assert_eq!(link.link_name().unwrap().unwrap().to_string_lossy(), "real.txt");
    }
}

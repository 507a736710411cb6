//! Subtree removal.
//!
//! Backup directories are removed bottom-up so that an interruption leaves a
//! smaller, still well-formed directory behind. Files named in `keep` at the
//! top level are left in place; the caller removes them last.

use crate::utils::errors::{CatalogError, Result};
use std::io::ErrorKind;
use std::path::Path;
use walkdir::WalkDir;

/// What a removal pass deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemovalStats {
    pub files: usize,
    pub dirs: usize,
    pub bytes: u64,
}

/// Remove everything below `root` except the top-level entries in `keep`.
///
/// `root` itself is not removed. Entries that disappear while walking are
/// ignored, which makes a repeated call after an interruption succeed.
pub fn remove_contents(root: &Path, keep: &[&str]) -> Result<RemovalStats> {
    let mut stats = RemovalStats::default();

    let walker = WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .contents_first(true);

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                if e.io_error().is_some_and(|io| io.kind() == ErrorKind::NotFound) {
                    continue;
                }
                let path = e.path().unwrap_or(root).to_path_buf();
                let source = e
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::new(ErrorKind::Other, "directory loop"));
                return Err(CatalogError::PartialIo { path, source });
            }
        };

        if entry.depth() == 1
            && keep
                .iter()
                .any(|name| entry.file_name().to_str() == Some(*name))
        {
            continue;
        }

        let path = entry.path();
        let result = if entry.file_type().is_dir() {
            std::fs::remove_dir(path).map(|_| stats.dirs += 1)
        } else {
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            std::fs::remove_file(path).map(|_| {
                stats.files += 1;
                stats.bytes += size;
            })
        };

        match result {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(source) => {
                return Err(CatalogError::PartialIo {
                    path: path.to_path_buf(),
                    source,
                })
            }
        }
    }

    Ok(stats)
}

/// Remove a single file, treating an already-missing file as removed.
pub fn remove_file_if_exists(path: &Path) -> std::io::Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_remove_contents_keeps_named_entries() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        fs::create_dir_all(root.join("database/base/1"))?;
        fs::write(root.join("database/base/1/1259"), b"12345")?; // 5 bytes
        fs::write(root.join("database/PG_VERSION"), b"16\n")?; // 3 bytes
        fs::write(root.join("backup.control"), b"status = \"OK\"")?;

        let stats = remove_contents(root, &["backup.control"])?;

        assert_eq!(stats.files, 2);
        assert_eq!(stats.dirs, 3);
        assert_eq!(stats.bytes, 8);
        assert!(root.join("backup.control").exists());
        assert!(!root.join("database").exists());

        Ok(())
    }

    #[test]
    fn test_remove_contents_is_repeatable() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::write(temp_dir.path().join("file"), b"x")?;

        assert_eq!(remove_contents(temp_dir.path(), &[])?.files, 1);
        assert_eq!(remove_contents(temp_dir.path(), &[])?, RemovalStats::default());

        Ok(())
    }

    #[test]
    fn test_remove_file_if_exists() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("segment");
        fs::write(&path, b"x")?;

        assert!(remove_file_if_exists(&path)?);
        assert!(!remove_file_if_exists(&path)?);

        Ok(())
    }
}

//! Atomic artifact publication: write to a temporary sibling, rename on success.
//!
//! A failed or interrupted run must never leave a partial artifact behind under
//! the final name, so every durable file in this crate goes through this module.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Returns the temporary sibling path used to stage `path` before the rename.
pub(crate) fn staging_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

/// Writes `bytes` to a temporary sibling of `path`, then renames it into place.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let staging = staging_path(path);
    fs::write(&staging, bytes)?;
    rename_into_place(&staging, path)
}

/// Renames a fully-written staging file produced by [`staging_path`] into place.
pub(crate) fn publish(path: &Path) -> io::Result<()> {
    rename_into_place(&staging_path(path), path)
}

/// A failed rename must not leave the staging file behind either; its name
/// is predictable and would shadow the next run's staging write.
fn rename_into_place(staging: &Path, path: &Path) -> io::Result<()> {
    fs::rename(staging, path).inspect_err(|_| {
        let _ = fs::remove_file(staging);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_atomic_leaves_no_staging_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("artifact.json");
        write_atomic(&path, b"{}").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"{}");
        assert!(!staging_path(&path).exists());
    }

    #[test]
    fn test_failed_rename_cleans_up_staging_file() {
        let dir = tempdir().unwrap();
        // A directory already occupying the final name makes the rename fail.
        let path = dir.path().join("artifact.json");
        fs::create_dir(&path).unwrap();

        assert!(write_atomic(&path, b"{}").is_err());
        assert!(!staging_path(&path).exists());
        assert!(path.is_dir());
    }
}

//! Scoped cleanup of ephemeral run files
//!
//! Everything a run creates outside the install root (work directory,
//! downloaded archive, snapshot) is registered here and removed when the
//! guard drops, whichever way the run ends.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct CleanupGuard {
    paths: Vec<PathBuf>,
}

impl CleanupGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `path` for removal on drop.
    pub fn track(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if !self.paths.contains(&path) {
            self.paths.push(path);
        }
    }

    /// Remove `path` now and stop tracking it.
    pub fn release(&mut self, path: &Path) -> io::Result<()> {
        self.paths.retain(|p| p != path);
        remove_path(path)
    }

    pub fn tracked(&self) -> &[PathBuf] {
        &self.paths
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        // Newest first so files go before the directories holding them.
        for path in self.paths.drain(..).rev() {
            match remove_path(&path) {
                Ok(()) => debug!("Cleaned up {}", path.display()),
                Err(e) => warn!("Failed to clean up {}: {}", path.display(), e),
            }
        }
    }
}

/// Remove a file or directory tree; already gone is fine.
pub(crate) fn remove_path(path: &Path) -> io::Result<()> {
    let result = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) => Err(e),
    };
    match result {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_drop_removes_tracked_paths() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("run");
        let file = dir.join("release.tar.gz");
        fs::create_dir_all(&dir).unwrap();
        fs::write(&file, b"x").unwrap();

        {
            let mut guard = CleanupGuard::new();
            guard.track(&dir);
            guard.track(&file);
        }

        assert!(!file.exists());
        assert!(!dir.exists());
    }

    #[test]
    fn test_drop_on_error_path() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("manifest.json");
        fs::write(&file, b"{}").unwrap();

        let failing = || -> Result<(), String> {
            let mut guard = CleanupGuard::new();
            guard.track(&file);
            Err("boom".to_string())
        };
        assert!(failing().is_err());
        assert!(!file.exists());
    }

    #[test]
    fn test_release_untracks() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("a");
        fs::write(&file, b"x").unwrap();

        let mut guard = CleanupGuard::new();
        guard.track(&file);
        guard.track(&file);
        assert_eq!(guard.tracked().len(), 1);
        guard.release(&file).unwrap();
        assert!(guard.tracked().is_empty());
        assert!(!file.exists());
    }

    #[test]
    fn test_missing_path_is_not_an_error() {
        assert!(remove_path(Path::new("/nonexistent/tsup/path")).is_ok());
    }
}

//! Pre-upgrade snapshot of installed files
//!
//! Taken only when an existing installation is about to be overwritten.
//! Restore is best-effort per file: one file failing to come back never stops
//! the others.

use super::cleanup::remove_path;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone)]
struct SnapshotEntry {
    original: PathBuf,
    copy: PathBuf,
    sha256: String,
}

/// Captured copies of installed files, keyed by logical name.
#[derive(Debug)]
pub struct BackupSnapshot {
    dir: PathBuf,
    entries: BTreeMap<String, SnapshotEntry>,
}

/// What a restore managed to put back.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    pub restored: Vec<String>,
    /// Snapshot copy vanished; nothing to restore.
    pub skipped: Vec<String>,
    /// `(name, reason)` for files that could not be restored
    pub failed: Vec<(String, String)>,
}

impl BackupSnapshot {
    /// Copy every existing file in `files` into `dir`. Originals that do not
    /// exist are simply not part of the snapshot.
    pub fn capture(dir: &Path, files: &[(&str, PathBuf)]) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let mut entries = BTreeMap::new();

        for (name, original) in files {
            if !original.is_file() {
                info!("Nothing to back up for {} ({})", name, original.display());
                continue;
            }
            let copy = dir.join(name);
            fs::copy(original, &copy)?;
            let sha256 = sha256_file(&copy)?;
            info!(
                "Backed up {} ({}, sha256 {})",
                name,
                original.display(),
                &sha256[..16]
            );
            entries.insert(
                name.to_string(),
                SnapshotEntry {
                    original: original.clone(),
                    copy,
                    sha256,
                },
            );
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            entries,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    /// Put every captured file back over its original path.
    pub fn restore(&self) -> RestoreReport {
        let mut report = RestoreReport::default();

        for (name, entry) in &self.entries {
            if !entry.copy.is_file() {
                warn!("Snapshot copy of {} is missing, skipping", name);
                report.skipped.push(name.clone());
                continue;
            }
            match restore_entry(entry) {
                Ok(()) => {
                    info!("Restored {}", entry.original.display());
                    report.restored.push(name.clone());
                }
                Err(reason) => {
                    warn!("Failed to restore {}: {}", name, reason);
                    report.failed.push((name.clone(), reason));
                }
            }
        }

        report
    }

    /// Delete the snapshot directory.
    pub fn discard(self) -> io::Result<()> {
        remove_path(&self.dir)
    }
}

/// Copy beside the target then rename over it, so a running binary is
/// replaced rather than rewritten in place.
fn restore_entry(entry: &SnapshotEntry) -> Result<(), String> {
    if let Some(parent) = entry.original.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("create {}: {}", parent.display(), e))?;
    }

    let staged = entry.original.with_extension("restore");
    fs::copy(&entry.copy, &staged).map_err(|e| format!("copy failed: {}", e))?;
    fs::rename(&staged, &entry.original).map_err(|e| {
        let _ = fs::remove_file(&staged);
        format!("rename failed: {}", e)
    })?;

    let restored = sha256_file(&entry.original).map_err(|e| format!("re-read failed: {}", e))?;
    if restored != entry.sha256 {
        return Err("checksum mismatch after restore".to_string());
    }
    Ok(())
}

pub(crate) fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, PathBuf, PathBuf) {
        let temp = TempDir::new().unwrap();
        let bin = temp.path().join("usr/sbin/tailscale");
        fs::create_dir_all(bin.parent().unwrap()).unwrap();
        fs::write(&bin, b"old binary").unwrap();
        let snap = temp.path().join("snapshot");
        (temp, bin, snap)
    }

    #[test]
    fn test_capture_and_restore() {
        let (temp, bin, snap) = setup();
        let missing = temp.path().join("etc/init.d/tailscale");
        let snapshot = BackupSnapshot::capture(
            &snap,
            &[("tailscale", bin.clone()), ("init-script", missing.clone())],
        )
        .unwrap();
        assert_eq!(snapshot.names(), vec!["tailscale"]);

        fs::write(&bin, b"new broken binary").unwrap();
        let report = snapshot.restore();
        assert_eq!(report.restored, vec!["tailscale"]);
        assert!(report.failed.is_empty());
        assert_eq!(fs::read(&bin).unwrap(), b"old binary");
        assert!(!missing.exists());
    }

    #[test]
    fn test_missing_copy_is_skipped() {
        let (_temp, bin, snap) = setup();
        let snapshot = BackupSnapshot::capture(&snap, &[("tailscale", bin.clone())]).unwrap();
        fs::remove_file(snap.join("tailscale")).unwrap();

        let report = snapshot.restore();
        assert_eq!(report.skipped, vec!["tailscale"]);
        assert!(report.restored.is_empty());
    }

    #[test]
    fn test_restore_recreates_deleted_original() {
        let (temp, bin, snap) = setup();
        let snapshot = BackupSnapshot::capture(&snap, &[("tailscale", bin.clone())]).unwrap();
        fs::remove_dir_all(temp.path().join("usr")).unwrap();

        snapshot.restore();
        assert_eq!(fs::read(&bin).unwrap(), b"old binary");
    }

    #[test]
    fn test_discard_removes_dir() {
        let (_temp, bin, snap) = setup();
        let snapshot = BackupSnapshot::capture(&snap, &[("tailscale", bin)]).unwrap();
        snapshot.discard().unwrap();
        assert!(!snap.exists());
    }

    #[test]
    fn test_sha256_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("f");
        fs::write(&path, b"abc").unwrap();
        assert_eq!(
            sha256_file(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}

//! Byte fetching and archive unpacking
//!
//! The orchestrator only needs "fetch bytes by URL" and "unpack an archive
//! onto a root directory"; both sit behind traits so runs can be driven
//! without a network or a real filesystem root.

use crate::error::{FetchError, UpgradeError};
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Fetches remote documents and files.
pub trait Fetcher {
    /// GET `url` and return the body.
    fn get(&self, url: &str) -> Result<Vec<u8>, FetchError>;

    /// GET `url` into `dest`, returning the number of bytes written.
    fn download(&self, url: &str, dest: &Path) -> Result<u64, FetchError>;
}

/// Unpacks a release archive.
pub trait Unpacker {
    fn unpack(&self, archive: &Path, root: &Path) -> Result<(), UpgradeError>;
}

/// Blocking HTTP fetcher backed by reqwest.
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(format!("tsup/{}", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Transport {
                url: String::new(),
                reason: e.to_string(),
            })?;
        Ok(Self { client })
    }

    fn send(&self, url: &str) -> Result<reqwest::blocking::Response, FetchError> {
        let response = self
            .client
            .get(url)
            .header("Accept", "application/vnd.github.v3+json")
            .send()
            .map_err(|e| FetchError::Transport {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        Ok(response)
    }
}

impl Fetcher for HttpFetcher {
    fn get(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        debug!("GET {}", url);
        let response = self.send(url)?;
        let bytes = response.bytes().map_err(|e| FetchError::Transport {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        Ok(bytes.to_vec())
    }

    fn download(&self, url: &str, dest: &Path) -> Result<u64, FetchError> {
        info!("Downloading {} to {}", url, dest.display());
        let mut response = self.send(url)?;
        let mut file = File::create(dest)?;
        let written = response.copy_to(&mut file).map_err(|e| FetchError::Transport {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        file.sync_all()?;
        Ok(written)
    }
}

/// Unpacks `.tar.gz` archives, preserving permissions.
#[derive(Debug, Default, Clone, Copy)]
pub struct TarGzUnpacker;

impl Unpacker for TarGzUnpacker {
    fn unpack(&self, archive: &Path, root: &Path) -> Result<(), UpgradeError> {
        info!("Unpacking {} onto {}", archive.display(), root.display());
        let file = File::open(archive).map_err(|e| {
            UpgradeError::Extraction(format!("cannot open {}: {}", archive.display(), e))
        })?;

        let mut tarball = tar::Archive::new(GzDecoder::new(file));
        tarball.set_preserve_permissions(true);
        tarball.set_overwrite(true);
        tarball
            .unpack(root)
            .map_err(|e| UpgradeError::Extraction(format!("{}: {}", archive.display(), e)))
    }
}

/// Size of `path`, or `None` when it does not exist.
pub(crate) fn file_len(path: &Path) -> io::Result<Option<u64>> {
    match fs::metadata(path) {
        Ok(meta) => Ok(Some(meta.len())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::build_release_archive;
    use tempfile::TempDir;

    #[test]
    fn test_unpack_places_files_under_root() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("release.tar.gz");
        fs::write(
            &archive,
            build_release_archive(&[("usr/sbin/tailscale", b"1.2.3".as_slice())]).unwrap(),
        )
        .unwrap();

        let root = temp.path().join("root");
        fs::create_dir_all(&root).unwrap();
        TarGzUnpacker.unpack(&archive, &root).unwrap();

        assert_eq!(fs::read(root.join("usr/sbin/tailscale")).unwrap(), b"1.2.3");
    }

    #[test]
    fn test_unpack_garbage_is_extraction_error() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("release.tar.gz");
        fs::write(&archive, b"definitely not gzip").unwrap();

        let err = TarGzUnpacker.unpack(&archive, temp.path()).unwrap_err();
        assert!(matches!(err, UpgradeError::Extraction(_)));
    }

    #[test]
    fn test_file_len() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("f");
        assert_eq!(file_len(&path).unwrap(), None);
        fs::write(&path, b"abc").unwrap();
        assert_eq!(file_len(&path).unwrap(), Some(3));
    }
}

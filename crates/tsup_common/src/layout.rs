//! Installed file locations

use std::path::{Path, PathBuf};

/// Where the agent's files live below a filesystem root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallLayout {
    pub root: PathBuf,
    pub service: String,
}

impl InstallLayout {
    pub fn new(root: impl Into<PathBuf>, service: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            service: service.into(),
        }
    }

    /// CLI binary
    pub fn agent_binary(&self) -> PathBuf {
        self.root.join("usr/sbin/tailscale")
    }

    /// Background daemon binary
    pub fn daemon_binary(&self) -> PathBuf {
        self.root.join("usr/sbin/tailscaled")
    }

    pub fn init_script(&self) -> PathBuf {
        self.root.join("etc/init.d").join(&self.service)
    }

    /// Files captured before an upgrade, keyed by logical name.
    pub fn backed_up_files(&self) -> Vec<(&'static str, PathBuf)> {
        vec![
            ("tailscale", self.agent_binary()),
            ("tailscaled", self.daemon_binary()),
            ("init-script", self.init_script()),
        ]
    }

    /// True if any file captured by a snapshot exists, even without the CLI.
    pub fn has_installed_files(&self) -> bool {
        self.backed_up_files().iter().any(|(_, path)| path.is_file())
    }

    /// Files that must exist after extraction.
    pub fn required_files(&self) -> Vec<PathBuf> {
        vec![self.agent_binary(), self.daemon_binary()]
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Probed state of the current installation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallationState {
    pub current_version: Option<String>,
    pub binaries_present: bool,
    /// Some installed file (daemon, init script) exists even if the CLI does not
    pub leftover_files: bool,
}

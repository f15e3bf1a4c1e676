//! OS package installation

use crate::command::{self, CommandError};
use tracing::{info, warn};

/// Packages the agent needs on a stock image.
pub const DEFAULT_PACKAGES: &[&str] = &["ca-bundle", "kmod-tun"];

/// Installs OS-level packages.
pub trait PackageInstaller {
    fn install(&self, packages: &[String]) -> Result<(), CommandError>;
}

/// `opkg` backed installer.
#[derive(Debug, Clone, Default)]
pub struct OpkgInstaller;

impl PackageInstaller for OpkgInstaller {
    fn install(&self, packages: &[String]) -> Result<(), CommandError> {
        if packages.is_empty() {
            return Ok(());
        }

        info!("Refreshing package lists");
        // A single unreachable feed fails the whole update; the install below
        // is what actually matters.
        if let Err(e) = command::run("opkg", ["update"]) {
            warn!("opkg update reported errors: {}", e);
        }

        info!("Installing packages: {}", packages.join(" "));
        let args = std::iter::once("install").chain(packages.iter().map(String::as_str));
        command::run("opkg", args).map(|_| ())
    }
}

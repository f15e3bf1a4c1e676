//! Service supervisor access
//!
//! OpenWrt services are procd init scripts under `/etc/init.d`; enabling one
//! creates an `Sxx<name>` symlink in `/etc/rc.d`.

use crate::command::{self, CommandError};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Start/stop/enable daemons and reload subsystems.
pub trait ServiceController {
    fn start(&self, service: &str) -> Result<(), CommandError>;
    fn stop(&self, service: &str) -> Result<(), CommandError>;
    fn enable(&self, service: &str) -> Result<(), CommandError>;
    fn reload(&self, service: &str) -> Result<(), CommandError>;

    /// Whether the boot-time start artifact for `service` exists.
    fn autostart_enabled(&self, service: &str) -> bool;
}

/// Controls services through their init scripts below `root`.
#[derive(Debug, Clone)]
pub struct InitdServiceController {
    root: PathBuf,
}

impl InitdServiceController {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn script(&self, service: &str) -> PathBuf {
        self.root.join("etc/init.d").join(service)
    }

    fn action(&self, service: &str, action: &str) -> Result<(), CommandError> {
        info!("{} {}", action, service);
        command::run(self.script(service), [action]).map(|_| ())
    }
}

impl Default for InitdServiceController {
    fn default() -> Self {
        Self::new("/")
    }
}

impl ServiceController for InitdServiceController {
    fn start(&self, service: &str) -> Result<(), CommandError> {
        self.action(service, "start")
    }

    fn stop(&self, service: &str) -> Result<(), CommandError> {
        self.action(service, "stop")
    }

    fn enable(&self, service: &str) -> Result<(), CommandError> {
        self.action(service, "enable")
    }

    fn reload(&self, service: &str) -> Result<(), CommandError> {
        self.action(service, "reload")
    }

    fn autostart_enabled(&self, service: &str) -> bool {
        has_start_link(&self.root.join("etc/rc.d"), service)
    }
}

/// Look for `S<priority><service>` in an rc.d directory.
pub fn has_start_link(rc_dir: &Path, service: &str) -> bool {
    let Ok(entries) = fs::read_dir(rc_dir) else {
        return false;
    };

    entries.filter_map(|e| e.ok()).any(|entry| {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        name.strip_prefix('S')
            .map(|rest| rest.trim_start_matches(|c: char| c.is_ascii_digit()) == service)
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_start_link_detection() {
        let temp = TempDir::new().unwrap();
        let rc = temp.path().join("etc/rc.d");
        fs::create_dir_all(&rc).unwrap();

        assert!(!has_start_link(&rc, "tailscale"));

        fs::write(rc.join("K10tailscale"), b"").unwrap();
        fs::write(rc.join("S90tailscaled-extra"), b"").unwrap();
        assert!(!has_start_link(&rc, "tailscale"));

        fs::write(rc.join("S90tailscale"), b"").unwrap();
        assert!(has_start_link(&rc, "tailscale"));

        let controller = InitdServiceController::new(temp.path());
        assert!(controller.autostart_enabled("tailscale"));
        assert!(!controller.autostart_enabled("dropbear"));
    }

    #[test]
    fn test_missing_rc_dir() {
        assert!(!has_start_link(Path::new("/nonexistent/rc.d"), "tailscale"));
    }

    #[cfg(unix)]
    #[test]
    fn test_init_script_invoked_with_action() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let initd = temp.path().join("etc/init.d");
        fs::create_dir_all(&initd).unwrap();
        let log = temp.path().join("calls");
        let script = initd.join("tailscale");
        fs::write(
            &script,
            format!("#!/bin/sh\necho \"$1\" >> {}\n", log.display()),
        )
        .unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        let controller = InitdServiceController::new(temp.path());
        controller.stop("tailscale").unwrap();
        controller.start("tailscale").unwrap();
        assert_eq!(fs::read_to_string(&log).unwrap(), "stop\nstart\n");

        assert!(controller.start("missing").is_err());
    }
}

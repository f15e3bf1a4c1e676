//! Run settings
//!
//! Defaults, overlaid by an optional TOML file, overlaid by the environment.
//! Config file: /etc/tsup/config.toml

use crate::error::UpgradeError;
use crate::packages::DEFAULT_PACKAGES;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// System config path
pub const SYSTEM_CONFIG_PATH: &str = "/etc/tsup/config.toml";

/// Comma-separated CIDRs advertised on first install
pub const ENV_ADVERTISE_ROUTE: &str = "TAILSCALE_ADVERTISE_ROUTE";

/// Control server override for first install
pub const ENV_LOGIN_SERVER: &str = "TAILSCALE_LOGIN_SERVER";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Release metadata endpoint, required before a run
    pub endpoint: String,
    /// Filesystem root archives are unpacked onto
    pub root: PathBuf,
    /// Parent of the per-run scratch directory
    pub work_dir: PathBuf,
    /// Init script name of the agent daemon
    pub service: String,
    /// OS packages installed before a fresh install
    pub packages: Vec<String>,
    pub advertise_routes: Vec<String>,
    pub login_server: Option<String>,
    pub http_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            root: PathBuf::from("/"),
            work_dir: PathBuf::from("/tmp"),
            service: "tailscale".to_string(),
            packages: DEFAULT_PACKAGES.iter().map(|p| p.to_string()).collect(),
            advertise_routes: Vec::new(),
            login_server: None,
            http_timeout_secs: 60,
        }
    }
}

impl Settings {
    /// Load settings.
    ///
    /// Priority:
    /// 1. Environment (`TAILSCALE_ADVERTISE_ROUTE`, `TAILSCALE_LOGIN_SERVER`)
    /// 2. `path` if given (must exist), else /etc/tsup/config.toml if present
    /// 3. Defaults
    pub fn load(path: Option<&Path>) -> Result<Self, UpgradeError> {
        let mut settings = match path {
            Some(p) => Self::from_file(p)?,
            None if Path::new(SYSTEM_CONFIG_PATH).exists() => {
                Self::from_file(Path::new(SYSTEM_CONFIG_PATH))?
            }
            None => Self::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self, UpgradeError> {
        let contents = fs::read_to_string(path).map_err(|e| {
            UpgradeError::Settings(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&contents)
            .map_err(|e| UpgradeError::Settings(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml(contents: &str) -> Result<Self, UpgradeError> {
        let settings: Settings =
            toml::from_str(contents).map_err(|e| UpgradeError::Settings(e.to_string()))?;
        for route in &settings.advertise_routes {
            validate_cidr(route)?;
        }
        Ok(settings)
    }

    /// Overlay environment values. Empty variables count as unset.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), UpgradeError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_ADVERTISE_ROUTE) {
            let routes = parse_route_list(&raw)?;
            if !routes.is_empty() {
                self.advertise_routes = routes;
            }
        }
        if let Some(server) = lookup(ENV_LOGIN_SERVER) {
            let server = server.trim();
            if !server.is_empty() {
                self.login_server = Some(server.to_string());
            }
        }
        Ok(())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

/// Split a comma-separated CIDR list, dropping blanks.
pub fn parse_route_list(raw: &str) -> Result<Vec<String>, UpgradeError> {
    raw.split(',')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(|r| validate_cidr(r).map(|_| r.to_string()))
        .collect()
}

fn validate_cidr(route: &str) -> Result<(), UpgradeError> {
    let invalid = || UpgradeError::Settings(format!("invalid route `{}`, expected CIDR", route));

    let (addr, prefix) = route.split_once('/').ok_or_else(invalid)?;
    let addr: IpAddr = addr.parse().map_err(|_| invalid())?;
    let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
    let max = if addr.is_ipv4() { 32 } else { 128 };
    if prefix > max {
        return Err(invalid());
    }
    Ok(())
}

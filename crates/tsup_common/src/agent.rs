//! Tailscale agent CLI
//!
//! Version probing of an installed agent and the first-install `up` call that
//! hands over to the control plane for authentication.

use crate::command::{self, CommandError};
use crate::version::parse_reported_version;
use std::path::Path;
use tracing::{debug, info};

/// Flags passed to the agent when it is first brought up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationOptions {
    /// CIDRs to advertise as subnet routes
    pub advertise_routes: Vec<String>,
    /// Control server override
    pub login_server: Option<String>,
}

impl ActivationOptions {
    /// Arguments for `tailscale up`.
    pub fn up_args(&self) -> Vec<String> {
        let mut args = vec!["up".to_string()];
        if !self.advertise_routes.is_empty() {
            args.push(format!("--advertise-routes={}", self.advertise_routes.join(",")));
        }
        if let Some(ref server) = self.login_server {
            args.push(format!("--login-server={}", server));
        }
        args
    }
}

/// Talks to an installed agent binary.
pub trait AgentClient {
    /// Normalized version reported by the binary, `None` if it cannot tell.
    fn installed_version(&self, agent_binary: &Path) -> Option<String>;

    /// Bring the agent up and authenticate against the control plane.
    fn authenticate(
        &self,
        agent_binary: &Path,
        options: &ActivationOptions,
    ) -> Result<(), CommandError>;
}

/// Runs the real `tailscale` binary.
#[derive(Debug, Clone, Default)]
pub struct TailscaleCli;

impl AgentClient for TailscaleCli {
    fn installed_version(&self, agent_binary: &Path) -> Option<String> {
        match command::run(agent_binary, ["version"]) {
            Ok(out) => parse_reported_version(&out.stdout),
            Err(e) => {
                debug!("Version probe failed: {}", e);
                None
            }
        }
    }

    fn authenticate(
        &self,
        agent_binary: &Path,
        options: &ActivationOptions,
    ) -> Result<(), CommandError> {
        let args = options.up_args();
        info!("Running {} {}", agent_binary.display(), args.join(" "));
        command::run(agent_binary, &args).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_up_args_plain() {
        assert_eq!(ActivationOptions::default().up_args(), vec!["up"]);
    }

    #[test]
    fn test_up_args_with_routes_and_server() {
        let opts = ActivationOptions {
            advertise_routes: vec!["192.168.1.0/24".into(), "10.0.0.0/8".into()],
            login_server: Some("https://hs.example.net".into()),
        };
        assert_eq!(
            opts.up_args(),
            vec![
                "up",
                "--advertise-routes=192.168.1.0/24,10.0.0.0/8",
                "--login-server=https://hs.example.net",
            ]
        );
    }

    #[test]
    fn test_missing_binary_has_no_version() {
        assert_eq!(
            TailscaleCli.installed_version(Path::new("/nonexistent/tailscale")),
            None
        );
    }
}

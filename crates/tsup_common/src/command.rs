//! External command execution
//!
//! Thin wrapper used by the opkg, init.d, uci and tailscale backends. Output
//! is returned as-is; callers decide what a failure means.

use std::ffi::OsStr;
use std::process::Command;
use thiserror::Error;
use tracing::debug;

/// A command that could not be run or exited non-zero.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("`{command}` failed: {reason}")]
pub struct CommandError {
    pub command: String,
    pub reason: String,
}

/// Captured stdout of a successful command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
}

/// Run `program args...`, failing on spawn errors and non-zero exit.
pub fn run<I, S>(program: impl AsRef<OsStr>, args: I) -> Result<CommandOutput, CommandError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(program);
    cmd.args(args);
    run_command(&mut cmd)
}

pub fn run_command(cmd: &mut Command) -> Result<CommandOutput, CommandError> {
    let rendered = render(cmd);
    debug!("Running {}", rendered);

    let output = cmd.output().map_err(|e| CommandError {
        command: rendered.clone(),
        reason: e.to_string(),
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(CommandError {
            command: rendered,
            reason: if stderr.is_empty() {
                output.status.to_string()
            } else {
                format!("{}: {}", output.status, stderr)
            },
        });
    }

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
    })
}

fn render(cmd: &Command) -> String {
    std::iter::once(cmd.get_program())
        .chain(cmd.get_args())
        .map(|s| s.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

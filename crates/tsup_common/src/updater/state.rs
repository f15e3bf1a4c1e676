//! Orchestrator states and run results

use crate::arch::ArchitectureTag;
use crate::asset::AssetSelection;
use crate::layout::InstallationState;
use crate::reconciler::ReconcileReport;
use std::fmt;

/// Named states of an orchestrator run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    DetectArch,
    ResolveVersion,
    SelectAsset,
    CompareVersion,
    UpToDate,
    Prerequisites,
    Backup,
    Download,
    Extract,
    Verify,
    CommitUpgrade,
    Rollback,
    Activate,
    PostInstallConfigure,
    Done,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::DetectArch => "detect_arch",
            Step::ResolveVersion => "resolve_version",
            Step::SelectAsset => "select_asset",
            Step::CompareVersion => "compare_version",
            Step::UpToDate => "up_to_date",
            Step::Prerequisites => "prerequisites",
            Step::Backup => "backup",
            Step::Download => "download",
            Step::Extract => "extract",
            Step::Verify => "verify",
            Step::CommitUpgrade => "commit_upgrade",
            Step::Rollback => "rollback",
            Step::Activate => "activate",
            Step::PostInstallConfigure => "post_install_configure",
            Step::Done => "done",
        }
    }

    /// Steps that end a run successfully.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Step::UpToDate | Step::Done)
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which install path a run takes after version comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeMode {
    /// No binaries on the device
    Fresh,
    /// Replacing an existing, different version
    Upgrade,
    /// Target version already installed but configuration incomplete;
    /// finish the first-install steps without downloading
    Repair,
}

impl UpgradeMode {
    /// Fresh and repair runs both finish with post-install configuration.
    pub fn is_first_install(&self) -> bool {
        !matches!(self, UpgradeMode::Upgrade)
    }
}

/// What version comparison decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    UpToDate,
    Install(UpgradeMode),
}

/// Read-only result of the pre-flight steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradePlan {
    pub arch: ArchitectureTag,
    pub target_version: String,
    pub asset: AssetSelection,
    pub installation: InstallationState,
    pub config_complete: bool,
    pub decision: Decision,
}

/// Successful end of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeOutcome {
    /// Target version installed and configuration complete; nothing done
    UpToDate { version: String },
    /// First install on a clean device
    Installed {
        version: String,
        config: ReconcileReport,
        warnings: Vec<String>,
    },
    /// Existing installation replaced
    Upgraded {
        from: Option<String>,
        to: String,
        warnings: Vec<String>,
    },
    /// Configuration finished for an already installed version
    Repaired {
        version: String,
        config: ReconcileReport,
        warnings: Vec<String>,
    },
}

impl UpgradeOutcome {
    pub fn version(&self) -> &str {
        match self {
            UpgradeOutcome::UpToDate { version }
            | UpgradeOutcome::Installed { version, .. }
            | UpgradeOutcome::Repaired { version, .. } => version,
            UpgradeOutcome::Upgraded { to, .. } => to,
        }
    }

    pub fn warnings(&self) -> &[String] {
        match self {
            UpgradeOutcome::UpToDate { .. } => &[],
            UpgradeOutcome::Installed { warnings, .. }
            | UpgradeOutcome::Upgraded { warnings, .. }
            | UpgradeOutcome::Repaired { warnings, .. } => warnings,
        }
    }

    pub fn summary(&self) -> String {
        match self {
            UpgradeOutcome::UpToDate { version } => {
                format!("tailscale {} already installed and configured", version)
            }
            UpgradeOutcome::Installed { version, .. } => {
                format!("tailscale {} installed and configured", version)
            }
            UpgradeOutcome::Upgraded { from, to, .. } => format!(
                "tailscale upgraded from {} to {}",
                from.as_deref().unwrap_or("unknown version"),
                to
            ),
            UpgradeOutcome::Repaired { version, .. } => {
                format!("tailscale {} configuration completed", version)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_install_modes() {
        assert!(UpgradeMode::Fresh.is_first_install());
        assert!(UpgradeMode::Repair.is_first_install());
        assert!(!UpgradeMode::Upgrade.is_first_install());
    }

    #[test]
    fn test_terminal_steps() {
        assert!(Step::Done.is_terminal());
        assert!(Step::UpToDate.is_terminal());
        assert!(!Step::Rollback.is_terminal());
    }

    #[test]
    fn test_outcome_summary() {
        let outcome = UpgradeOutcome::Upgraded {
            from: None,
            to: "1.84.2".into(),
            warnings: vec!["degraded".into()],
        };
        assert_eq!(outcome.version(), "1.84.2");
        assert_eq!(outcome.warnings().len(), 1);
        assert!(outcome.summary().contains("unknown version"));
    }
}

//! Host architecture detection
//!
//! Maps the kernel's machine identifier (`uname -m`) onto the architecture
//! tags used in release asset names.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::process::Command;
use tracing::{debug, warn};

/// Architecture tag as it appears in `tailscale_<version>_<arch>.tar.gz`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchitectureTag {
    Amd64,
    Arm64,
    Arm,
    Mips,
    Mipsle,
    /// Nothing is published for this machine; never used for lookups.
    Unknown,
}

impl ArchitectureTag {
    /// Map a raw machine identifier to its tag.
    pub fn from_machine(machine: &str) -> Self {
        let machine = machine.trim();
        match machine {
            "x86_64" => Self::Amd64,
            "aarch64" => Self::Arm64,
            "mips" => Self::Mips,
            "mipsel" => Self::Mipsle,
            m if m.starts_with("armv8") => Self::Arm64,
            m if m.starts_with("arm") => Self::Arm,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Amd64 => "amd64",
            Self::Arm64 => "arm64",
            Self::Arm => "arm",
            Self::Mips => "mips",
            Self::Mipsle => "mipsle",
            Self::Unknown => "unknown",
        }
    }

    pub fn is_known(&self) -> bool {
        *self != Self::Unknown
    }
}

impl fmt::Display for ArchitectureTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reads the machine identifier of the host, or uses a fixed one.
#[derive(Debug, Clone, Default)]
pub struct ArchitectureDetector {
    machine_override: Option<String>,
}

impl ArchitectureDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Detector that reports `machine` instead of asking the kernel.
    pub fn fixed(machine: impl Into<String>) -> Self {
        Self {
            machine_override: Some(machine.into()),
        }
    }

    /// Raw machine identifier, empty when it cannot be read.
    pub fn machine(&self) -> String {
        if let Some(ref machine) = self.machine_override {
            return machine.clone();
        }

        match Command::new("uname").arg("-m").output() {
            Ok(output) if output.status.success() => {
                String::from_utf8_lossy(&output.stdout).trim().to_string()
            }
            Ok(output) => {
                warn!(
                    "uname -m exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                );
                String::new()
            }
            Err(e) => {
                warn!("Failed to run uname: {}", e);
                String::new()
            }
        }
    }

    pub fn detect(&self) -> ArchitectureTag {
        let machine = self.machine();
        let tag = ArchitectureTag::from_machine(&machine);
        debug!("Machine `{}` maps to architecture {}", machine, tag);
        tag
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_documented_mappings() {
        let cases = [
            ("x86_64", ArchitectureTag::Amd64),
            ("aarch64", ArchitectureTag::Arm64),
            ("armv8l", ArchitectureTag::Arm64),
            ("armv8b", ArchitectureTag::Arm64),
            ("armv7l", ArchitectureTag::Arm),
            ("armv6l", ArchitectureTag::Arm),
            ("arm", ArchitectureTag::Arm),
            ("mips", ArchitectureTag::Mips),
            ("mipsel", ArchitectureTag::Mipsle),
        ];
        for (machine, expected) in cases {
            assert_eq!(ArchitectureTag::from_machine(machine), expected, "{}", machine);
        }
    }

    #[test]
    fn test_unrecognized_is_unknown() {
        for machine in ["", "i686", "riscv64", "mips64", "ppc", "X86_64"] {
            assert_eq!(ArchitectureTag::from_machine(machine), ArchitectureTag::Unknown);
        }
        assert!(!ArchitectureTag::Unknown.is_known());
    }

    #[test]
    fn test_fixed_detector() {
        let detector = ArchitectureDetector::fixed("aarch64\n");
        assert_eq!(detector.detect(), ArchitectureTag::Arm64);
    }

    #[test]
    fn test_display_matches_asset_tag() {
        assert_eq!(ArchitectureTag::Mipsle.to_string(), "mipsle");
        assert_eq!(ArchitectureTag::Amd64.to_string(), "amd64");
    }
}

//! Release asset selection

use crate::arch::ArchitectureTag;
use crate::error::UpgradeError;
use crate::release::ReleaseManifest;
use tracing::warn;

/// Product prefix of every release archive.
pub const ASSET_PRODUCT: &str = "tailscale";

/// Expected archive name for a version/architecture pair.
pub fn asset_name(version: &str, arch: ArchitectureTag) -> String {
    format!("{}_{}_{}.tar.gz", ASSET_PRODUCT, version, arch.as_str())
}

/// The chosen archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetSelection {
    pub name: String,
    pub url: String,
    /// Architecture the archive was built for.
    pub arch: ArchitectureTag,
    /// Set when a 64-bit ARM host fell back to the 32-bit ARM build.
    pub degraded: Option<String>,
}

fn find_url<'m>(manifest: &'m ReleaseManifest, name: &str) -> Option<&'m str> {
    manifest
        .assets
        .iter()
        .find(|a| a.name == name)
        .map(|a| a.download_url.as_str())
}

/// Pick the archive URL for `version` on `arch`.
///
/// Only arm64 has a fallback (to arm). Every other miss is `AssetNotFound`
/// with the full list of published names for diagnostics.
pub fn select_asset(
    manifest: &ReleaseManifest,
    version: &str,
    arch: ArchitectureTag,
) -> Result<AssetSelection, UpgradeError> {
    let wanted = asset_name(version, arch);
    if arch.is_known() {
        if let Some(url) = find_url(manifest, &wanted) {
            return Ok(AssetSelection {
                name: wanted,
                url: url.to_string(),
                arch,
                degraded: None,
            });
        }
    }

    if arch == ArchitectureTag::Arm64 {
        let fallback = asset_name(version, ArchitectureTag::Arm);
        if let Some(url) = find_url(manifest, &fallback) {
            let message = format!(
                "no {} build published; using 32-bit {} instead",
                wanted, fallback
            );
            warn!("{}", message);
            return Ok(AssetSelection {
                name: fallback,
                url: url.to_string(),
                arch: ArchitectureTag::Arm,
                degraded: Some(message),
            });
        }
    }

    Err(UpgradeError::AssetNotFound {
        wanted,
        available: manifest.asset_names(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::release::Asset;

    fn manifest(names: &[(&str, &str)]) -> ReleaseManifest {
        ReleaseManifest {
            version: "1.2.3".to_string(),
            assets: names
                .iter()
                .map(|(n, u)| Asset {
                    name: n.to_string(),
                    download_url: u.to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_exact_match() {
        let m = manifest(&[("tailscale_1.2.3_arm64.tar.gz", "U1")]);
        let sel = select_asset(&m, "1.2.3", ArchitectureTag::Arm64).unwrap();
        assert_eq!(sel.url, "U1");
        assert!(sel.degraded.is_none());
    }

    #[test]
    fn test_arm64_falls_back_to_arm() {
        let m = manifest(&[
            ("tailscale_1.2.3_amd64.tar.gz", "U0"),
            ("tailscale_1.2.3_arm.tar.gz", "U2"),
        ]);
        let sel = select_asset(&m, "1.2.3", ArchitectureTag::Arm64).unwrap();
        assert_eq!(sel.url, "U2");
        assert_eq!(sel.arch, ArchitectureTag::Arm);
        assert!(sel.degraded.is_some());
    }

    #[test]
    fn test_mips_has_no_fallback() {
        let m = manifest(&[("tailscale_1.2.3_mipsle.tar.gz", "U3")]);
        match select_asset(&m, "1.2.3", ArchitectureTag::Mips) {
            Err(UpgradeError::AssetNotFound { wanted, available }) => {
                assert_eq!(wanted, "tailscale_1.2.3_mips.tar.gz");
                assert_eq!(available, vec!["tailscale_1.2.3_mipsle.tar.gz"]);
            }
            other => panic!("expected AssetNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_first_match_wins() {
        let m = manifest(&[
            ("tailscale_1.2.3_amd64.tar.gz", "first"),
            ("tailscale_1.2.3_amd64.tar.gz", "second"),
        ]);
        let sel = select_asset(&m, "1.2.3", ArchitectureTag::Amd64).unwrap();
        assert_eq!(sel.url, "first");
    }

    #[test]
    fn test_match_is_case_sensitive() {
        let m = manifest(&[("Tailscale_1.2.3_AMD64.tar.gz", "U")]);
        assert!(select_asset(&m, "1.2.3", ArchitectureTag::Amd64).is_err());
    }

    #[test]
    fn test_arm_does_not_fall_back_further() {
        let m = manifest(&[("tailscale_1.2.3_arm64.tar.gz", "U")]);
        assert!(select_asset(&m, "1.2.3", ArchitectureTag::Arm).is_err());
    }
}

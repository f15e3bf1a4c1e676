//! Latest release resolution
//!
//! Fetches the release metadata document (GitHub releases API shape) once per
//! run and keeps the parsed manifest for later lookups. The feed must publish
//! `tailscale_<version>_<arch>.tar.gz` archives laid out relative to `/`;
//! there is no built-in default, the endpoint comes from settings.

use crate::error::UpgradeError;
use crate::fetch::Fetcher;
use crate::version::normalize_version;
use serde::Deserialize;
use std::cell::OnceCell;
use tracing::info;

/// One downloadable artifact of a release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub name: String,
    pub download_url: String,
}

/// The latest release: normalized version plus assets in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseManifest {
    pub version: String,
    pub assets: Vec<Asset>,
}

impl ReleaseManifest {
    pub fn asset_names(&self) -> Vec<String> {
        self.assets.iter().map(|a| a.name.clone()).collect()
    }

    /// Parse a release document.
    pub fn from_json(body: &[u8]) -> Result<Self, UpgradeError> {
        let doc: ReleaseDocument = serde_json::from_slice(body)
            .map_err(|e| UpgradeError::Parse(format!("invalid release document: {}", e)))?;

        let tag = doc
            .tag_name
            .ok_or_else(|| UpgradeError::Parse("no tag_name in release".to_string()))?;
        let version = normalize_version(&tag);
        if version.is_empty() {
            return Err(UpgradeError::Parse(format!(
                "tag_name `{}` is empty after normalization",
                tag
            )));
        }

        let assets = doc
            .assets
            .into_iter()
            .map(|a| Asset {
                name: a.name,
                download_url: a.browser_download_url,
            })
            .collect();

        Ok(Self { version, assets })
    }
}

#[derive(Debug, Deserialize)]
struct ReleaseDocument {
    tag_name: Option<String>,
    #[serde(default)]
    assets: Vec<AssetDocument>,
}

#[derive(Debug, Deserialize)]
struct AssetDocument {
    name: String,
    browser_download_url: String,
}

/// Resolves the latest release from a fixed endpoint, caching the result.
pub struct ReleaseResolver<'a> {
    fetcher: &'a dyn Fetcher,
    endpoint: String,
    cached: OnceCell<ReleaseManifest>,
}

impl<'a> ReleaseResolver<'a> {
    pub fn new(fetcher: &'a dyn Fetcher, endpoint: impl Into<String>) -> Self {
        Self {
            fetcher,
            endpoint: endpoint.into(),
            cached: OnceCell::new(),
        }
    }

    /// Latest manifest; the network is hit only on the first call.
    pub fn fetch_latest(&self) -> Result<&ReleaseManifest, UpgradeError> {
        if let Some(manifest) = self.cached.get() {
            return Ok(manifest);
        }

        if self.endpoint.trim().is_empty() {
            return Err(UpgradeError::Settings(
                "no release endpoint configured (set `endpoint` or pass --endpoint)".to_string(),
            ));
        }

        info!("Fetching release manifest from {}", self.endpoint);
        let body = self.fetcher.get(&self.endpoint)?;
        let manifest = ReleaseManifest::from_json(&body)?;
        info!(
            "Latest release is {} with {} assets",
            manifest.version,
            manifest.assets.len()
        );

        Ok(self.cached.get_or_init(|| manifest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeFetcher;

    const DOC: &str = r#"{
        "tag_name": "v1.84.2",
        "name": "1.84.2",
        "assets": [
            {"name": "tailscale_1.84.2_arm64.tar.gz", "browser_download_url": "https://dl/arm64", "size": 10},
            {"name": "tailscale_1.84.2_mips.tar.gz", "browser_download_url": "https://dl/mips"}
        ]
    }"#;

    #[test]
    fn test_parse_manifest() {
        let manifest = ReleaseManifest::from_json(DOC.as_bytes()).unwrap();
        assert_eq!(manifest.version, "1.84.2");
        assert_eq!(manifest.assets.len(), 2);
        assert_eq!(manifest.assets[0].download_url, "https://dl/arm64");
        assert_eq!(
            manifest.asset_names(),
            vec!["tailscale_1.84.2_arm64.tar.gz", "tailscale_1.84.2_mips.tar.gz"]
        );
    }

    #[test]
    fn test_missing_tag_is_parse_error() {
        let err = ReleaseManifest::from_json(br#"{"assets": []}"#).unwrap_err();
        assert!(matches!(err, UpgradeError::Parse(_)));
    }

    #[test]
    fn test_bare_v_tag_is_parse_error() {
        let err = ReleaseManifest::from_json(br#"{"tag_name": "v"}"#).unwrap_err();
        assert!(matches!(err, UpgradeError::Parse(_)));
    }

    #[test]
    fn test_invalid_json_is_parse_error() {
        let err = ReleaseManifest::from_json(b"<html>rate limited</html>").unwrap_err();
        assert!(matches!(err, UpgradeError::Parse(_)));
    }

    #[test]
    fn test_manifest_fetched_once() {
        let fetcher = FakeFetcher::new().with_document("https://api/latest", DOC);
        let resolver = ReleaseResolver::new(&fetcher, "https://api/latest");

        let first = resolver.fetch_latest().unwrap().version.clone();
        let second = resolver.fetch_latest().unwrap().version.clone();
        assert_eq!(first, second);
        assert_eq!(fetcher.request_count("https://api/latest"), 1);
    }

    #[test]
    fn test_unconfigured_endpoint_is_settings_error() {
        let fetcher = FakeFetcher::new();
        let resolver = ReleaseResolver::new(&fetcher, "");
        let err = resolver.fetch_latest().unwrap_err();
        assert!(matches!(err, UpgradeError::Settings(_)));
        assert_eq!(fetcher.total_requests(), 0);
    }

    #[test]
    fn test_unreachable_endpoint_is_network_error() {
        let fetcher = FakeFetcher::new();
        let resolver = ReleaseResolver::new(&fetcher, "https://api/latest");
        let err = resolver.fetch_latest().unwrap_err();
        assert!(matches!(err, UpgradeError::Network(_)));
    }
}

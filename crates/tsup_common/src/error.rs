//! Error types for tsup.

use std::path::PathBuf;
use thiserror::Error;

/// Failures surfaced by a configuration store backend.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("config store command `{command}` failed: {stderr}")]
    Command { command: String, stderr: String },

    #[error("section {package}.{section} does not exist")]
    MissingSection { package: String, section: String },

    #[error("malformed config store output: {0}")]
    Malformed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures from fetching bytes over the network.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request to {url} failed: {reason}")]
    Transport { url: String, reason: String },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Every fatal condition an orchestrator run can end in.
#[derive(Error, Debug)]
pub enum UpgradeError {
    #[error("unsupported platform: machine `{machine}` has no release architecture")]
    UnsupportedPlatform { machine: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("release manifest parse error: {0}")]
    Parse(String),

    #[error("no release asset named {wanted} (available: {})", available.join(", "))]
    AssetNotFound {
        wanted: String,
        available: Vec<String>,
    },

    #[error("archive extraction failed: {0}")]
    Extraction(String),

    #[error("installed files missing after extraction: {}", display_paths(missing))]
    Verification { missing: Vec<PathBuf> },

    #[error("activation failed: {0}")]
    Activation(String),

    #[error("prerequisite packages failed to install: {0}")]
    Prerequisite(String),

    #[error("configuration store error: {0}")]
    Config(#[from] StoreError),

    #[error("invalid settings: {0}")]
    Settings(String),

    #[error("upgrade rolled back after failure: {source}")]
    RolledBack {
        #[source]
        source: Box<UpgradeError>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl UpgradeError {
    /// Process exit status for this failure. Zero is reserved for success.
    pub fn exit_code(&self) -> i32 {
        match self {
            UpgradeError::UnsupportedPlatform { .. } => 2,
            UpgradeError::Network(_) => 3,
            UpgradeError::Parse(_) => 4,
            UpgradeError::AssetNotFound { .. } => 5,
            UpgradeError::Extraction(_) => 6,
            UpgradeError::Verification { .. } => 7,
            UpgradeError::RolledBack { .. } => 8,
            UpgradeError::Activation(_) => 9,
            UpgradeError::Config(_) => 10,
            UpgradeError::Prerequisite(_) => 11,
            UpgradeError::Settings(_) => 12,
            UpgradeError::Io(_) => 13,
        }
    }

    /// The failure that started it all, looking through rollback wrapping.
    pub fn root_cause(&self) -> &UpgradeError {
        match self {
            UpgradeError::RolledBack { source } => source.root_cause(),
            other => other,
        }
    }
}

impl From<FetchError> for UpgradeError {
    fn from(e: FetchError) -> Self {
        UpgradeError::Network(e.to_string())
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

//! tsup common - Tailscale install and upgrade core for OpenWrt routers
//!
//! Detects the router architecture, resolves the latest release, picks the
//! matching archive, installs or upgrades with rollback, and reconciles the
//! network and firewall configuration the agent needs.

pub mod agent;
pub mod arch;
pub mod asset;
pub mod command;
pub mod config_store;
pub mod error;
pub mod fetch;
pub mod layout;
pub mod packages;
pub mod reconciler;
pub mod release;
pub mod service;
pub mod settings;
pub mod testing;
pub mod updater;
pub mod version;

pub use arch::{ArchitectureDetector, ArchitectureTag};
pub use asset::{select_asset, AssetSelection};
pub use error::{FetchError, StoreError, UpgradeError};
pub use reconciler::{ConfigReconciler, ReconcileReport};
pub use release::{ReleaseManifest, ReleaseResolver};
pub use settings::Settings;
pub use updater::*;

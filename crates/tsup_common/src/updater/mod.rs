//! Upgrade orchestration
//!
//! Guarantees:
//! 1. Nothing is changed before the version comparison decides to install
//! 2. Existing installed files are snapshotted before they are overwritten,
//!    including leftovers of a partial install
//! 3. Any failure between backup and commit restores the snapshot
//! 4. Ephemeral files are removed on every exit path
//!
//! State machine steps:
//! 1. detect_arch
//! 2. resolve_version
//! 3. select_asset
//! 4. compare_version (may end in up_to_date)
//! 5. prerequisites (fresh install, then backup if leftovers exist) or backup (upgrade)
//! 6. download
//! 7. extract
//! 8. verify
//! 9. commit_upgrade
//! 10. activate
//! 11. post_install_configure (first install only)
//! 12. rollback (on failure after backup)

pub mod cleanup;
pub mod snapshot;
pub mod state;
pub mod steps;

pub use cleanup::CleanupGuard;
pub use snapshot::{BackupSnapshot, RestoreReport};
pub use state::{Decision, Step, UpgradeMode, UpgradeOutcome, UpgradePlan};
pub use steps::{Collaborators, UpgradeOrchestrator};

//! Upgrade orchestrator
//!
//! Drives one install/upgrade run through the states in `state::Step`.
//! Everything up to `CompareVersion` is read-only. From `Backup` until
//! `CommitUpgrade` a snapshot is held and any failure goes through
//! `Rollback`; after the commit a failure simply ends the run.

use super::cleanup::CleanupGuard;
use super::snapshot::BackupSnapshot;
use super::state::{Decision, Step, UpgradeMode, UpgradeOutcome, UpgradePlan};
use crate::agent::{ActivationOptions, AgentClient, TailscaleCli};
use crate::arch::{ArchitectureDetector, ArchitectureTag};
use crate::asset::{select_asset, AssetSelection};
use crate::config_store::{ConfigStore, UciConfigStore};
use crate::error::UpgradeError;
use crate::fetch::{file_len, Fetcher, HttpFetcher, TarGzUnpacker, Unpacker};
use crate::layout::{InstallLayout, InstallationState};
use crate::packages::{OpkgInstaller, PackageInstaller};
use crate::reconciler::{ConfigReconciler, ReconcileReport};
use crate::release::ReleaseResolver;
use crate::service::{InitdServiceController, ServiceController};
use crate::settings::Settings;
use crate::version::same_version;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Subsystems reloaded after the configuration changes.
const RELOADED_SUBSYSTEMS: [&str; 2] = ["network", "firewall"];

/// The outside world as seen by a run.
pub struct Collaborators {
    pub fetcher: Box<dyn Fetcher>,
    pub unpacker: Box<dyn Unpacker>,
    pub store: Box<dyn ConfigStore>,
    pub services: Box<dyn ServiceController>,
    pub packages: Box<dyn PackageInstaller>,
    pub agent: Box<dyn AgentClient>,
}

impl Collaborators {
    /// Real router backends: reqwest, tar.gz, uci, init.d, opkg, tailscale.
    pub fn system(settings: &Settings) -> Result<Self, UpgradeError> {
        let store = if settings.root == Path::new("/") {
            UciConfigStore::new()
        } else {
            UciConfigStore::with_confdir(settings.root.join("etc/config"))
        };

        Ok(Self {
            fetcher: Box::new(HttpFetcher::new(settings.http_timeout())?),
            unpacker: Box::new(TarGzUnpacker),
            store: Box::new(store),
            services: Box::new(InitdServiceController::new(&settings.root)),
            packages: Box::new(OpkgInstaller),
            agent: Box::new(TailscaleCli),
        })
    }
}

/// Installs or upgrades the agent and reconciles router configuration.
pub struct UpgradeOrchestrator {
    settings: Settings,
    layout: InstallLayout,
    detector: ArchitectureDetector,
    deps: Collaborators,
    history: Vec<Step>,
}

impl UpgradeOrchestrator {
    pub fn new(settings: Settings, detector: ArchitectureDetector, deps: Collaborators) -> Self {
        let layout = InstallLayout::new(&settings.root, &settings.service);
        Self {
            settings,
            layout,
            detector,
            deps,
            history: Vec::new(),
        }
    }

    /// States visited by the most recent `run` or `plan`.
    pub fn history(&self) -> &[Step] {
        &self.history
    }

    /// Full run: install, upgrade, repair, or nothing.
    pub fn run(&mut self) -> Result<UpgradeOutcome, UpgradeError> {
        let (result, history) = {
            let mut run = Run::new(&self.settings, &self.layout, &self.detector, &self.deps);
            let result = run.execute();
            (result, run.finish())
        };
        self.history = history;
        result
    }

    /// Pre-flight only: decide what a run would do without changing anything.
    pub fn plan(&mut self) -> Result<UpgradePlan, UpgradeError> {
        let (result, history) = {
            let mut run = Run::new(&self.settings, &self.layout, &self.detector, &self.deps);
            let result = run.preflight();
            (result, run.finish())
        };
        self.history = history;
        result
    }
}

/// State of a single run. Dropping it releases every ephemeral file.
struct Run<'a> {
    settings: &'a Settings,
    layout: &'a InstallLayout,
    detector: &'a ArchitectureDetector,
    deps: &'a Collaborators,
    resolver: ReleaseResolver<'a>,
    guard: CleanupGuard,
    history: Vec<Step>,
    installation: InstallationState,
    config_complete: bool,
    work_dir: Option<PathBuf>,
    archive: Option<PathBuf>,
    snapshot: Option<BackupSnapshot>,
    warnings: Vec<String>,
    config_report: ReconcileReport,
}

impl<'a> Run<'a> {
    fn new(
        settings: &'a Settings,
        layout: &'a InstallLayout,
        detector: &'a ArchitectureDetector,
        deps: &'a Collaborators,
    ) -> Self {
        Self {
            settings,
            layout,
            detector,
            deps,
            resolver: ReleaseResolver::new(deps.fetcher.as_ref(), settings.endpoint.clone()),
            guard: CleanupGuard::new(),
            history: Vec::new(),
            installation: InstallationState::default(),
            config_complete: false,
            work_dir: None,
            archive: None,
            snapshot: None,
            warnings: Vec::new(),
            config_report: ReconcileReport::default(),
        }
    }

    fn finish(self) -> Vec<Step> {
        self.history
    }

    fn enter(&mut self, step: Step) {
        debug!("Entering {}", step);
        self.history.push(step);
    }

    fn service(&self) -> &str {
        &self.settings.service
    }

    fn execute(&mut self) -> Result<UpgradeOutcome, UpgradeError> {
        let plan = self.preflight()?;

        let mode = match plan.decision {
            Decision::UpToDate => {
                self.enter(Step::UpToDate);
                info!("tailscale {} is current and configured", plan.target_version);
                return Ok(UpgradeOutcome::UpToDate {
                    version: plan.target_version,
                });
            }
            Decision::Install(mode) => mode,
        };

        let mut step = match mode {
            UpgradeMode::Fresh => Step::Prerequisites,
            UpgradeMode::Upgrade => Step::Backup,
            UpgradeMode::Repair => Step::Activate,
        };

        while !step.is_terminal() {
            self.enter(step);
            step = match self.advance(step, mode, &plan.asset) {
                Ok(next) => next,
                Err(err) => return Err(self.fail(err)),
            };
        }
        self.enter(step);

        Ok(self.outcome(plan, mode))
    }

    /// DetectArch through CompareVersion; no side effects.
    fn preflight(&mut self) -> Result<UpgradePlan, UpgradeError> {
        self.enter(Step::DetectArch);
        let arch = self.detect_arch()?;

        self.enter(Step::ResolveVersion);
        let target_version = self.resolve_version()?;

        self.enter(Step::SelectAsset);
        let asset = self.select(&target_version, arch)?;

        self.enter(Step::CompareVersion);
        let decision = self.compare_version(&target_version)?;

        Ok(UpgradePlan {
            arch,
            target_version,
            asset,
            installation: self.installation.clone(),
            config_complete: self.config_complete,
            decision,
        })
    }

    fn advance(
        &mut self,
        step: Step,
        mode: UpgradeMode,
        asset: &AssetSelection,
    ) -> Result<Step, UpgradeError> {
        match step {
            Step::Prerequisites => {
                self.install_prerequisites()?;
                if self.installation.leftover_files {
                    Ok(Step::Backup)
                } else {
                    Ok(Step::Download)
                }
            }
            Step::Backup => {
                self.backup()?;
                Ok(Step::Download)
            }
            Step::Download => {
                self.download(asset)?;
                Ok(Step::Extract)
            }
            Step::Extract => {
                self.extract()?;
                Ok(Step::Verify)
            }
            Step::Verify => {
                self.verify()?;
                Ok(Step::CommitUpgrade)
            }
            Step::CommitUpgrade => {
                self.commit();
                Ok(Step::Activate)
            }
            Step::Activate => {
                self.activate()?;
                if mode.is_first_install() {
                    Ok(Step::PostInstallConfigure)
                } else {
                    Ok(Step::Done)
                }
            }
            Step::PostInstallConfigure => {
                self.post_install_configure()?;
                Ok(Step::Done)
            }
            Step::DetectArch
            | Step::ResolveVersion
            | Step::SelectAsset
            | Step::CompareVersion
            | Step::UpToDate
            | Step::Rollback
            | Step::Done => Err(UpgradeError::Io(io::Error::other(format!(
                "{} is not an install step",
                step
            )))),
        }
    }

    /// Route a failure through rollback when a snapshot is held.
    fn fail(&mut self, err: UpgradeError) -> UpgradeError {
        match self.snapshot.take() {
            Some(snapshot) => {
                self.enter(Step::Rollback);
                self.rollback(snapshot, err)
            }
            None => {
                error!("Run failed: {}", err);
                err
            }
        }
    }

    fn detect_arch(&mut self) -> Result<ArchitectureTag, UpgradeError> {
        let arch = self.detector.detect();
        if !arch.is_known() {
            let machine = self.detector.machine();
            error!("Machine `{}` is not a supported architecture", machine);
            return Err(UpgradeError::UnsupportedPlatform { machine });
        }
        info!("Detected architecture {}", arch);
        Ok(arch)
    }

    fn resolve_version(&mut self) -> Result<String, UpgradeError> {
        Ok(self.resolver.fetch_latest()?.version.clone())
    }

    fn select(
        &mut self,
        version: &str,
        arch: ArchitectureTag,
    ) -> Result<AssetSelection, UpgradeError> {
        let manifest = self.resolver.fetch_latest()?;
        match select_asset(manifest, version, arch) {
            Ok(selection) => {
                info!("Selected asset {}", selection.name);
                if let Some(ref message) = selection.degraded {
                    self.warnings.push(message.clone());
                }
                Ok(selection)
            }
            Err(err) => {
                if let UpgradeError::AssetNotFound { ref available, .. } = err {
                    error!("Release {} publishes: {}", version, available.join(", "));
                }
                Err(err)
            }
        }
    }

    fn compare_version(&mut self, target: &str) -> Result<Decision, UpgradeError> {
        let agent_binary = self.layout.agent_binary();
        let binaries_present = agent_binary.is_file();
        let current_version = if binaries_present {
            self.deps.agent.installed_version(&agent_binary)
        } else {
            None
        };
        let leftover_files = !binaries_present && self.layout.has_installed_files();
        if leftover_files {
            warn!(
                "No tailscale CLI, but files of an earlier install remain; they will be backed up"
            );
        }
        self.installation = InstallationState {
            current_version: current_version.clone(),
            binaries_present,
            leftover_files,
        };
        self.config_complete = ConfigReconciler::new(self.deps.store.as_ref()).is_complete()?;

        let same = current_version
            .as_deref()
            .map(|current| same_version(current, target))
            .unwrap_or(false);

        let decision = match (same, self.config_complete, binaries_present) {
            (true, true, _) => Decision::UpToDate,
            (true, false, _) => Decision::Install(UpgradeMode::Repair),
            (false, _, true) => Decision::Install(UpgradeMode::Upgrade),
            (false, _, false) => Decision::Install(UpgradeMode::Fresh),
        };

        info!(
            "Installed: {}, target: {}, config complete: {}, decision: {:?}",
            current_version.as_deref().unwrap_or("none"),
            target,
            self.config_complete,
            decision
        );
        Ok(decision)
    }

    /// Per-run scratch directory, created on first use.
    fn work_dir(&mut self) -> Result<PathBuf, UpgradeError> {
        if let Some(ref dir) = self.work_dir {
            return Ok(dir.clone());
        }

        let dir = self.settings.work_dir.join(format!(
            "tsup-{}-{}",
            chrono::Utc::now().format("%Y%m%d%H%M%S"),
            std::process::id()
        ));
        fs::create_dir_all(&dir)?;
        self.guard.track(&dir);
        self.work_dir = Some(dir.clone());
        Ok(dir)
    }

    fn install_prerequisites(&mut self) -> Result<(), UpgradeError> {
        self.deps
            .packages
            .install(&self.settings.packages)
            .map_err(|e| UpgradeError::Prerequisite(e.to_string()))
    }

    fn backup(&mut self) -> Result<(), UpgradeError> {
        let dir = self.work_dir()?.join("snapshot");
        let snapshot = BackupSnapshot::capture(&dir, &self.layout.backed_up_files())?;
        info!(
            "Snapshot of {} taken in {}",
            snapshot.names().join(", "),
            snapshot.dir().display()
        );
        self.snapshot = Some(snapshot);

        // A stale process is preferable to aborting the upgrade.
        if let Err(e) = self.deps.services.stop(self.service()) {
            let message = format!("could not stop {} before upgrading: {}", self.service(), e);
            warn!("{}", message);
            self.warnings.push(message);
        }
        Ok(())
    }

    fn download(&mut self, asset: &AssetSelection) -> Result<(), UpgradeError> {
        let archive = self.work_dir()?.join(&asset.name);
        self.guard.track(&archive);
        self.archive = Some(archive.clone());

        let written = self.deps.fetcher.download(&asset.url, &archive)?;
        debug!("Fetcher reported {} bytes", written);

        match file_len(&archive)? {
            None => Err(UpgradeError::Network(format!(
                "download of {} produced no file",
                asset.url
            ))),
            Some(0) => Err(UpgradeError::Network(format!(
                "downloaded archive {} is empty",
                asset.name
            ))),
            Some(len) => {
                info!("Downloaded {} ({} bytes)", asset.name, len);
                Ok(())
            }
        }
    }

    fn extract(&mut self) -> Result<(), UpgradeError> {
        let archive = self
            .archive
            .clone()
            .ok_or_else(|| UpgradeError::Extraction("no archive was downloaded".to_string()))?;
        self.deps.unpacker.unpack(&archive, self.layout.root())
    }

    fn verify(&mut self) -> Result<(), UpgradeError> {
        let missing: Vec<PathBuf> = self
            .layout
            .required_files()
            .into_iter()
            .filter(|p| !p.is_file())
            .collect();
        if !missing.is_empty() {
            return Err(UpgradeError::Verification { missing });
        }
        info!("Agent and daemon binaries present");
        Ok(())
    }

    /// Drop the archive and snapshot. Rollback is impossible after this.
    fn commit(&mut self) {
        if let Some(archive) = self.archive.take() {
            if let Err(e) = self.guard.release(&archive) {
                warn!("Failed to remove {}: {}", archive.display(), e);
            }
        }
        if let Some(snapshot) = self.snapshot.take() {
            let dir = snapshot.dir().to_path_buf();
            if let Err(e) = snapshot.discard() {
                warn!("Failed to remove snapshot {}: {}", dir.display(), e);
            }
        }
        info!("Upgrade committed");
    }

    fn activate(&mut self) -> Result<(), UpgradeError> {
        self.deps
            .services
            .start(self.service())
            .map_err(|e| UpgradeError::Activation(format!("starting {}: {}", self.service(), e)))
    }

    fn post_install_configure(&mut self) -> Result<(), UpgradeError> {
        let options = ActivationOptions {
            advertise_routes: self.settings.advertise_routes.clone(),
            login_server: self.settings.login_server.clone(),
        };
        self.deps
            .agent
            .authenticate(&self.layout.agent_binary(), &options)
            .map_err(|e| UpgradeError::Activation(format!("authentication: {}", e)))?;

        self.deps
            .services
            .enable(self.service())
            .map_err(|e| UpgradeError::Activation(format!("enabling {}: {}", self.service(), e)))?;
        if !self.deps.services.autostart_enabled(self.service()) {
            return Err(UpgradeError::Activation(format!(
                "{} enabled but no autostart entry exists",
                self.service()
            )));
        }

        self.config_report = ConfigReconciler::new(self.deps.store.as_ref()).reconcile()?;
        info!("Configuration reconciled: {:?}", self.config_report);

        for subsystem in RELOADED_SUBSYSTEMS {
            self.deps
                .services
                .reload(subsystem)
                .map_err(|e| UpgradeError::Activation(format!("reloading {}: {}", subsystem, e)))?;
        }
        Ok(())
    }

    /// Restore the snapshot, restart the service, and fail with `cause`.
    fn rollback(&mut self, snapshot: BackupSnapshot, cause: UpgradeError) -> UpgradeError {
        error!("{}; rolling back", cause);

        let report = snapshot.restore();
        for (name, reason) in &report.failed {
            warn!("Rollback could not restore {}: {}", name, reason);
        }
        info!(
            "Rollback restored {} file(s), skipped {}",
            report.restored.len(),
            report.skipped.len()
        );

        if let Err(e) = self.deps.services.start(self.service()) {
            warn!("Could not restart {} after rollback: {}", self.service(), e);
        }

        UpgradeError::RolledBack {
            source: Box::new(cause),
        }
    }

    fn outcome(&mut self, plan: UpgradePlan, mode: UpgradeMode) -> UpgradeOutcome {
        let warnings = std::mem::take(&mut self.warnings);
        let config = std::mem::take(&mut self.config_report);
        let version = plan.target_version;
        match mode {
            UpgradeMode::Fresh => UpgradeOutcome::Installed {
                version,
                config,
                warnings,
            },
            UpgradeMode::Upgrade => UpgradeOutcome::Upgraded {
                from: plan.installation.current_version,
                to: version,
                warnings,
            },
            UpgradeMode::Repair => UpgradeOutcome::Repaired {
                version,
                config,
                warnings,
            },
        }
    }
}

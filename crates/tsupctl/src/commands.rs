//! Subcommand implementations

use crate::Cli;
use anyhow::{bail, Context, Result};
use tracing::{info, warn};
use tsup_common::{
    ArchitectureDetector, Collaborators, ConfigReconciler, Decision, Settings, UpgradeError,
    UpgradeOrchestrator,
};

/// Settings file and environment, then command line overrides.
fn load_settings(cli: &Cli) -> Result<Settings> {
    let mut settings = Settings::load(cli.config.as_deref()).context("loading settings")?;
    if let Some(ref root) = cli.root {
        settings.root = root.clone();
    }
    if let Some(ref endpoint) = cli.endpoint {
        settings.endpoint = endpoint.clone();
    }
    Ok(settings)
}

fn orchestrator(cli: &Cli) -> Result<UpgradeOrchestrator> {
    let settings = load_settings(cli)?;
    let deps = Collaborators::system(&settings).context("initializing backends")?;
    Ok(UpgradeOrchestrator::new(settings, ArchitectureDetector::new(), deps))
}

pub fn run(cli: &Cli) -> Result<()> {
    let mut orchestrator = orchestrator(cli)?;
    let outcome = orchestrator.run()?;

    for warning in outcome.warnings() {
        warn!("{}", warning);
    }
    println!("{}", outcome.summary());
    Ok(())
}

pub fn check(cli: &Cli) -> Result<()> {
    let mut orchestrator = orchestrator(cli)?;
    let plan = orchestrator.plan()?;

    println!("architecture:  {}", plan.arch);
    println!("latest:        {}", plan.target_version);
    println!("asset:         {}", plan.asset.name);
    if let Some(ref degraded) = plan.asset.degraded {
        println!("               ({})", degraded);
    }
    println!(
        "installed:     {}",
        plan.installation.current_version.as_deref().unwrap_or("none")
    );
    let config = if plan.config_complete {
        "complete"
    } else {
        "incomplete"
    };
    println!("config:        {}", config);
    let action = match plan.decision {
        Decision::UpToDate => "nothing to do".to_string(),
        Decision::Install(mode) => format!("{:?}", mode).to_lowercase(),
    };
    println!("action:        {}", action);
    Ok(())
}

pub fn reconcile(cli: &Cli) -> Result<()> {
    let settings = load_settings(cli)?;
    let deps = Collaborators::system(&settings).context("initializing backends")?;

    let report = ConfigReconciler::new(deps.store.as_ref())
        .reconcile()
        .map_err(UpgradeError::from)?;
    if !report.changed() {
        println!("configuration already complete");
        return Ok(());
    }

    info!("Reloading network and firewall");
    for subsystem in ["network", "firewall"] {
        deps.services
            .reload(subsystem)
            .with_context(|| format!("reloading {}", subsystem))?;
    }
    println!("configuration updated: {:?}", report);
    Ok(())
}

pub fn arch() -> Result<()> {
    let detector = ArchitectureDetector::new();
    let tag = detector.detect();
    let machine = detector.machine();
    if !tag.is_known() {
        bail!(UpgradeError::UnsupportedPlatform { machine });
    }
    println!("{} ({})", tag, machine);
    Ok(())
}

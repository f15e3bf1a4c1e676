//! tsup control - install and upgrade Tailscale on OpenWrt routers

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use tsup_common::UpgradeError;

// Version is embedded at build time
const VERSION: &str = env!("TSUP_VERSION");

#[derive(Parser)]
#[command(name = "tsupctl")]
#[command(about = "Install, upgrade and configure Tailscale on OpenWrt", long_about = None)]
#[command(version = VERSION)]
struct Cli {
    /// Settings file (default: /etc/tsup/config.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Filesystem root to install onto
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Release metadata endpoint (required unless set in the config file)
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install, upgrade or repair the agent
    Run,

    /// Show what `run` would do without changing anything
    Check,

    /// Only reconcile network and firewall configuration
    Reconcile,

    /// Print the detected release architecture
    Arch,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Run => commands::run(&cli),
        Commands::Check => commands::check(&cli),
        Commands::Reconcile => commands::reconcile(&cli),
        Commands::Arch => commands::arch(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("tsupctl: {:#}", err);
            ExitCode::from(exit_code(&err))
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Run failures carry their own code; anything else is a generic 1.
fn exit_code(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<UpgradeError>()
        .map(|e| u8::try_from(e.exit_code()).unwrap_or(1))
        .unwrap_or(1)
}

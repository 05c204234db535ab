use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod config;
mod dispatch;
mod render;
mod server;

#[derive(Parser, Debug)]
#[command(name = "rollsafe")]
#[command(about = "Transactional component updates with backup and rollback", long_about = None)]
struct Cli {
    /// Config file; defaults to ./rollsafe.toml when present.
    #[arg(long, global = true, env = "ROLLSAFE_CONFIG")]
    config: Option<PathBuf>,
    /// Host root; overrides `root` from the config file.
    #[arg(long, global = true, env = "ROLLSAFE_ROOT")]
    root: Option<PathBuf>,
    #[arg(long, short, global = true)]
    verbose: bool,
    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    log_json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List installed components and available versions.
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Show what an update would do without touching anything.
    Plan {
        /// Component identifiers; all installed components when omitted.
        components: Vec<String>,
        #[arg(long)]
        json: bool,
    },
    /// Update components transactionally.
    Update {
        components: Vec<String>,
        #[arg(long, conflicts_with = "components")]
        all: bool,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        idempotency_key: Option<String>,
        #[arg(long)]
        no_health_check: bool,
        #[arg(long)]
        no_reactivate: bool,
        #[arg(long)]
        deactivate_during_swap: bool,
        #[arg(long)]
        timeout_secs: Option<u64>,
        #[arg(long)]
        json: bool,
    },
    /// Check directories, disk space and decoders.
    Preflight {
        #[arg(long)]
        json: bool,
    },
    /// Reinstate a component whose live directory is missing.
    Rescue { component: String },
    /// Delete backups older than the configured (or given) age.
    Prune {
        #[arg(long)]
        max_age_secs: Option<u64>,
    },
    /// Delete abandoned update workspaces.
    Sweep {
        #[arg(long, default_value_t = dispatch::DEFAULT_SWEEP_AGE_SECS)]
        max_age_secs: u64,
    },
    /// Serve the HTTP update API.
    Serve {
        #[arg(long)]
        listen: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);
    dispatch::run_cli(cli)
}

fn init_tracing(verbose: bool, json: bool) {
    let default_directive = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

#[cfg(test)]
mod tests;

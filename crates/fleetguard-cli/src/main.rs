//! Operator entry point for the FleetGuard workload controller.
//!
//! Everything here runs against an in-process `PlanExecutorApi` backed by
//! `fleetguard_driver::SimulatedDriver` — there is no transport layer and
//! no persistence; each invocation builds a fresh in-memory controller,
//! exercises it, and exits. See `commands::demo` for the end-to-end path.

mod commands;
mod harness;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "fleetguard", version, about = "FleetGuard workload controller CLI")]
struct Cli {
    /// Path to a KDL controller configuration file; defaults built in if absent.
    #[arg(long, env = "FLEETGUARD_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and validate a controller configuration file.
    Validate {
        /// Path to the KDL configuration file.
        #[arg(default_value = "fleetguard.kdl")]
        path: PathBuf,
    },
    /// Run a scripted end-to-end scenario against a `SimulatedDriver`:
    /// register a workload, submit a scale plan, run a canary rollout, and
    /// stream the resulting events to stdout.
    Demo {
        /// Skip the canary rollout step and only submit the scale plan.
        #[arg(long)]
        no_canary: bool,
    },
    /// Submit an `ActionPlan` read from a JSON file against a fresh
    /// in-memory controller seeded with a single demo deployment.
    SubmitPlan {
        /// Path to a JSON-encoded `ActionPlan`.
        path: PathBuf,
    },
    /// Start a canary rollout from a JSON-encoded `StartCanaryRequest`
    /// against a fresh in-memory controller.
    StartCanary {
        /// Path to a JSON-encoded `StartCanaryRequest`.
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Validate { path } => commands::validate::run(&path),
        Commands::Demo { no_canary } => commands::demo::run(config, !no_canary).await,
        Commands::SubmitPlan { path } => commands::submit_plan::run(config, &path).await,
        Commands::StartCanary { path } => commands::start_canary::run(config, &path).await,
    }
}

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "grinder")]
#[command(about = "Grinder reconcile / remediation operator CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration utilities
    Config {
        #[command(subcommand)]
        cmd: ConfigCmd,
    },

    /// Remediation budget utilities
    Budget {
        #[command(subcommand)]
        cmd: BudgetCmd,
    },

    /// Reconcile utilities
    Reconcile {
        #[command(subcommand)]
        cmd: ReconcileCmd,
    },
}

#[derive(Subcommand)]
enum ConfigCmd {
    /// Load and validate the environment; print fingerprint + canonical JSON.
    Check,
}

#[derive(Subcommand)]
enum BudgetCmd {
    /// Print today's persisted budget usage against the configured limits.
    Status,
}

#[derive(Subcommand)]
enum ReconcileCmd {
    /// Run one offline cycle over a JSON state file. Venue calls are refused.
    Replay {
        /// State file (expected orders, stream/REST observations, prices)
        #[arg(long)]
        state: PathBuf,

        /// HA role for the cycle (ACTIVE | STANDBY | UNKNOWN)
        #[arg(long, default_value = "UNKNOWN")]
        role: String,

        /// Mark the kill switch active (logged only)
        #[arg(long, default_value_t = false)]
        kill_switch: bool,

        /// Also print Prometheus metrics after the report
        #[arg(long, default_value_t = false)]
        metrics: bool,
    },
}

fn main() -> Result<()> {
    // Dev convenience; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let cli = Cli::parse();
    match cli.cmd {
        Commands::Config { cmd } => match cmd {
            ConfigCmd::Check => commands::config::check(),
        },
        Commands::Budget { cmd } => match cmd {
            BudgetCmd::Status => commands::budget::status(),
        },
        Commands::Reconcile { cmd } => match cmd {
            ReconcileCmd::Replay {
                state,
                role,
                kill_switch,
                metrics,
            } => commands::replay::run(&state, &role, kill_switch, metrics),
        },
    }
}

/// Logs go to stderr; stdout carries command output only.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

//! `relaygate` -- CLI for the relaygate model gateway.
//!
//! Provides the following subcommands:
//!
//! - `relaygate check` -- Validate a config file and print the effective config.
//! - `relaygate route` -- Dry-run a routing decision against configured backends.
//! - `relaygate backends` -- List the backends declared in a config file.
//! - `relaygate health` -- Print the health snapshot for the configured backends.

use clap::{Parser, Subcommand};

mod commands;

/// relaygate model gateway CLI.
#[derive(Parser)]
#[command(name = "relaygate", about = "relaygate model gateway CLI", version)]
struct Cli {
    /// Enable verbose (debug-level) logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Validate a config file and print the effective configuration.
    Check(commands::check::CheckArgs),

    /// Show which backend a request would be routed to.
    Route(commands::route::RouteArgs),

    /// List configured backends.
    Backends(commands::backends::BackendsArgs),

    /// Print the system health snapshot for the configured backends.
    Health(commands::health::HealthArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Check(args) => commands::check::run(args)?,
        Commands::Route(args) => commands::route::run(args)?,
        Commands::Backends(args) => commands::backends::run(args)?,
        Commands::Health(args) => commands::health::run(args).await?,
    }

    Ok(())
}

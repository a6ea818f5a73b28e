//! `relaygate health` -- print a health snapshot.
//!
//! Config-declared backends have no live health check, so this shows the
//! snapshot a freshly started gateway would report.

use clap::Args;

use super::{dry_run_gateway, load_config};

/// Arguments for the `health` subcommand.
#[derive(Args)]
pub struct HealthArgs {
    /// Config file path (TOML or JSON).
    #[arg(short, long)]
    pub config: Option<String>,
}

pub async fn run(args: HealthArgs) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref())?;
    let gateway = dry_run_gateway(config)?;
    gateway.health_check_all().await;
    let snapshot = gateway.get_system_health();
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

//! `relaygate check` -- validate a config file.

use clap::Args;

use super::load_config;

/// Arguments for the `check` subcommand.
#[derive(Args)]
pub struct CheckArgs {
    /// Config file path (TOML or JSON).
    #[arg(short, long)]
    pub config: Option<String>,
}

/// Print the effective configuration as JSON.
pub fn run(args: CheckArgs) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref())?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    eprintln!(
        "config OK: {} backend(s), strategy {}",
        config.backends.len(),
        config.routing_strategy
    );
    Ok(())
}

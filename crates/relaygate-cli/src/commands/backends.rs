//! `relaygate backends` -- list configured backends.

use clap::Args;
use comfy_table::{Table, presets::UTF8_FULL};

use super::load_config;

/// Arguments for the `backends` subcommand.
#[derive(Args)]
pub struct BackendsArgs {
    /// Config file path (TOML or JSON).
    #[arg(short, long)]
    pub config: Option<String>,
}

pub fn run(args: BackendsArgs) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref())?;
    if config.backends.is_empty() {
        println!("No backends configured.");
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(["ID", "CAPABILITIES", "COST/TOKEN", "LATENCY (ms)", "TIER"]);
    for backend in &config.backends {
        let tier = if backend.tier.is_empty() {
            "-"
        } else {
            backend.tier.as_str()
        };
        table.add_row([
            backend.id.clone(),
            backend.capabilities.to_string(),
            format!("{:.6}", backend.cost_per_token),
            backend.declared_latency_ms.to_string(),
            tier.to_string(),
        ]);
    }

    println!("{table}");
    println!("  {} backend(s)", config.backends.len());
    Ok(())
}

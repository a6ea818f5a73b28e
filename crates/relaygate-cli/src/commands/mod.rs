//! Subcommand implementations and the helpers they share.

pub mod backends;
pub mod check;
pub mod health;
pub mod route;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing::debug;

use relaygate_core::{DescriptorOnly, Gateway};
use relaygate_types::GatewayConfig;

/// Environment variable consulted when `--config` is not given.
pub const CONFIG_ENV: &str = "RELAYGATE_CONFIG";

/// Resolve the config path from the flag or `RELAYGATE_CONFIG`.
fn config_path(flag: Option<&str>) -> Option<PathBuf> {
    flag.map(PathBuf::from)
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
}

/// Load and validate the config, or fall back to defaults when no path is
/// given.
pub fn load_config(flag: Option<&str>) -> anyhow::Result<GatewayConfig> {
    match config_path(flag) {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            GatewayConfig::load(&path)
                .with_context(|| format!("failed to load config from {}", path.display()))
        }
        None => {
            debug!("no config given, using defaults");
            Ok(GatewayConfig::default())
        }
    }
}

/// A gateway whose backends are the config's descriptors, routable but not
/// executable.
pub fn dry_run_gateway(config: GatewayConfig) -> anyhow::Result<Gateway> {
    let backends = config.backends.clone();
    let mut builder = Gateway::builder(config);
    for descriptor in backends {
        builder = builder.backend(Arc::new(DescriptorOnly::new(descriptor)));
    }
    builder.build().context("failed to build gateway")
}

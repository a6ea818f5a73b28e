//! `relaygate route` -- dry-run a routing decision.

use anyhow::bail;
use clap::Args;

use relaygate_types::{GenerationRequest, StrategyKind, UserTier};

use super::{dry_run_gateway, load_config};

/// Arguments for the `route` subcommand.
#[derive(Args)]
pub struct RouteArgs {
    /// Config file path (TOML or JSON).
    #[arg(short, long)]
    pub config: Option<String>,

    /// Prompt text to route.
    #[arg(short, long)]
    pub prompt: String,

    /// User tier (free, standard, premium, enterprise).
    #[arg(long, default_value = "standard")]
    pub tier: String,

    /// Override the configured routing strategy.
    #[arg(long)]
    pub strategy: Option<String>,

    /// Route as a streaming request.
    #[arg(long)]
    pub stream: bool,

    /// Attach an image reference (repeatable).
    #[arg(long = "image")]
    pub images: Vec<String>,

    /// Declared context size in tokens.
    #[arg(long)]
    pub context_tokens: Option<u32>,

    /// Latency target in milliseconds.
    #[arg(long)]
    pub latency_target_ms: Option<u64>,

    /// Preferred backend id.
    #[arg(long)]
    pub prefer: Option<String>,
}

/// Build the request described by `args`.
fn build_request(args: &RouteArgs) -> anyhow::Result<GenerationRequest> {
    let Some(tier) = UserTier::parse(&args.tier) else {
        bail!("unknown tier: {}", args.tier);
    };
    let mut request = GenerationRequest::new(&args.prompt).with_tier(tier);
    if args.stream {
        request = request.streaming();
    }
    for image in &args.images {
        request = request.with_image(image);
    }
    if let Some(tokens) = args.context_tokens {
        request = request.with_context_tokens(tokens);
    }
    if let Some(ms) = args.latency_target_ms {
        request = request.with_latency_target_ms(ms);
    }
    if let Some(id) = &args.prefer {
        request = request.prefer(id);
    }
    Ok(request)
}

/// Print the routing decision as JSON.
pub fn run(args: RouteArgs) -> anyhow::Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(name) = &args.strategy {
        match StrategyKind::parse(name) {
            Some(StrategyKind::Custom) => {
                bail!("the custom strategy needs a scorer and cannot be used from the CLI")
            }
            Some(kind) => config.routing_strategy = kind,
            None => bail!("unknown strategy: {name}"),
        }
    }
    if config.backends.is_empty() {
        bail!("no backends configured; add [[backends]] entries to the config file");
    }

    let request = build_request(&args)?;
    let gateway = dry_run_gateway(config)?;
    let decision = gateway.get_routing_decision(&request)?;
    println!("{}", serde_json::to_string_pretty(&decision)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use relaygate_types::Capability;

    use super::*;

    fn args(prompt: &str) -> RouteArgs {
        RouteArgs {
            config: None,
            prompt: prompt.into(),
            tier: "premium".into(),
            strategy: None,
            stream: false,
            images: Vec::new(),
            context_tokens: None,
            latency_target_ms: None,
            prefer: None,
        }
    }

    #[test]
    fn request_reflects_flags() {
        let mut a = args("hello");
        a.stream = true;
        a.images = vec!["img.png".into()];
        a.context_tokens = Some(64_000);
        a.prefer = Some("big".into());
        let request = build_request(&a).unwrap();

        assert_eq!(request.user_tier, UserTier::Premium);
        assert!(request.stream);
        assert_eq!(request.images.len(), 1);
        assert_eq!(request.preferred_backend.as_deref(), Some("big"));
        let required = relaygate_core::registry::required_capabilities(&request);
        assert!(required.contains(Capability::LongContext));
        assert!(required.contains(Capability::Multimodal));
    }

    #[test]
    fn unknown_tier_is_rejected() {
        let mut a = args("hello");
        a.tier = "platinum".into();
        assert!(build_request(&a).is_err());
    }
}

//! Tier-routing proxy for coding-agent sessions.
//!
//! # Architecture Overview
//!
//! ```text
//!                        ┌────────────────────────────────────────────────┐
//!                        │                  TIER PROXY                    │
//!                        │                                                │
//!     Client Request     │  ┌─────────┐    ┌────────────┐                 │
//!     ───────────────────┼─▶│  http   │───▶│  routing   │                 │
//!                        │  │ server  │    │ classifier │                 │
//!                        │  └─────────┘    └─────┬──────┘                 │
//!                        │                       │                        │
//!                        │          ┌────────────┴───────────┐            │
//!                        │          ▼                        ▼            │
//!                        │  ┌──────────────┐        ┌────────────────┐    │
//!                        │  │   primary    │◀─fail──│   secondary    │    │     Upstream
//!                        │  │  (client     │        │ (local key,    │────┼──▶  providers
//!                        │  │ credentials) │        │ circuit breaker)│   │
//!                        │  └──────────────┘        └────────────────┘    │
//!                        │                                                │
//!                        │  ┌──────────────────────────────────────────┐  │
//!                        │  │          Cross-Cutting Concerns          │  │
//!                        │  │  config · health · observability ·       │  │
//!                        │  │  resilience · lifecycle                  │  │
//!                        │  └──────────────────────────────────────────┘  │
//!                        └────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;

use tier_proxy::config::{ObservabilityConfig, CONFIG_PATH_ENV};
use tier_proxy::lifecycle::{resolve_config, serve, signals, Shutdown};
use tier_proxy::observability::logging::init_logging;

#[derive(Parser)]
#[command(name = "tier-proxy")]
#[command(about = "Local proxy routing model tiers between two LLM providers", long_about = None)]
struct Cli {
    /// Optional TOML configuration file
    #[arg(short, long, env = CONFIG_PATH_ENV)]
    config: Option<PathBuf>,

    /// Listen port (overrides PORT and the config file)
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let (config, warnings) = match resolve_config(cli.config.as_deref(), cli.port, |key| {
        std::env::var(key).ok()
    }) {
        Ok(resolved) => resolved,
        Err(e) => {
            init_logging(&ObservabilityConfig::default());
            tracing::error!(error = %e, "Invalid configuration");
            return Err(e.into());
        }
    };

    init_logging(&config.observability);
    tracing::info!("tier-proxy v{} starting", env!("CARGO_PKG_VERSION"));
    for warning in &warnings {
        tracing::warn!("{}", warning);
    }

    let shutdown = Shutdown::new();
    signals::spawn_signal_handler(shutdown.clone());

    serve(config, shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

//! Startup orchestration.
//!
//! # Responsibilities
//! - Resolve configuration from file, environment and CLI overrides
//! - Start the metrics exporter when enabled
//! - Bind the listener and log the routing table before serving
//!
//! # Design Decisions
//! - Fail fast: invalid configuration is fatal
//! - Listeners start last (traffic only when ready)

use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;
use tokio::net::TcpListener;

use crate::config::{load, validate_config, ConfigError, ConfigWarning, ProxyConfig};
use crate::health::HealthSnapshot;
use crate::http::HttpServer;
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::upstream::UpstreamError;

/// Errors that stop the proxy from starting.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to build upstream client: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Defaults, then `path`, then the environment, then the CLI port; validated.
pub fn resolve_config<F>(
    path: Option<&Path>,
    port: Option<u16>,
    lookup: F,
) -> Result<(ProxyConfig, Vec<ConfigWarning>), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let (mut config, mut warnings) = load(path, lookup)?;
    if let Some(port) = port {
        config.listener.set_port(port);
    }
    warnings.extend(validate_config(&config).map_err(ConfigError::Validation)?);
    Ok((config, warnings))
}

/// Bind and serve until `shutdown` fires.
pub async fn serve(config: ProxyConfig, shutdown: Shutdown) -> Result<(), StartupError> {
    let shutdown_rx = shutdown.subscribe();

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let local_addr = listener.local_addr()?;
    let server = HttpServer::new(config)?;

    log_routing(local_addr, &server.health().snapshot());
    server.run(listener, shutdown_rx).await?;
    Ok(())
}

fn log_routing(addr: SocketAddr, snapshot: &HealthSnapshot) {
    tracing::info!(
        address = %addr,
        secondary_model = snapshot.secondary_model.as_deref().unwrap_or("none"),
        breaker_threshold = snapshot.circuit_breaker.threshold,
        breaker_open_secs = snapshot.circuit_breaker.open_duration_secs,
        "Listening for connections"
    );
    for (family, target) in &snapshot.routing {
        tracing::info!(family = %family, target = %target, "Route");
    }
    tracing::info!(features = ?snapshot.fallbacks, "Always routed to primary");
}

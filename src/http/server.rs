//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with all handlers
//! - Wire up middleware (request ID, tracing, timeout, body limit)
//! - Dispatch message requests to the routing engine
//! - Serve the health document
//! - Stop accepting on shutdown and drain in-flight requests

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, Uri},
    response::Json,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::ProxyConfig;
use crate::health::{HealthReporter, HealthSnapshot};
use crate::http::request::{request_id, ShortRequestId, X_REQUEST_ID};
use crate::resilience::CircuitBreaker;
use crate::routing::{InboundRequest, RouteError, RouteOutcome, Router as ProxyRouter};
use crate::upstream::UpstreamError;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<ProxyRouter>,
    pub health: Arc<HealthReporter>,
}

/// HTTP server for the proxy.
pub struct HttpServer {
    router: Router,
    health: Arc<HealthReporter>,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    ///
    /// The circuit breaker is created here and shared by the routing engine
    /// and the health reporter.
    pub fn new(config: ProxyConfig) -> Result<Self, UpstreamError> {
        let breaker = Arc::new(CircuitBreaker::from_config(&config.circuit_breaker));
        let proxy_router = Arc::new(ProxyRouter::from_config(&config, breaker)?);
        let health = Arc::new(HealthReporter::new(&proxy_router));

        let state = AppState {
            router: proxy_router,
            health: Arc::clone(&health),
        };

        let router = Self::build_router(&config, state);
        Ok(Self { router, health })
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &ProxyConfig, state: AppState) -> Router {
        let middleware = ServiceBuilder::new()
            .layer(SetRequestIdLayer::new(X_REQUEST_ID, ShortRequestId))
            .layer(TraceLayer::new_for_http())
            .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)));

        Router::new()
            .route("/v1/messages", post(messages_handler))
            .route("/v1/messages/count_tokens", post(count_tokens_handler))
            .route("/health", get(health_handler))
            .layer(DefaultBodyLimit::max(config.limits.max_body_bytes))
            .with_state(state)
            .layer(middleware)
    }

    /// Health reporter shared with the `/health` handler.
    pub fn health(&self) -> &HealthReporter {
        &self.health
    }

    /// Run the server until a shutdown signal arrives, then drain.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received, draining in-flight requests");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Routed completion endpoint.
async fn messages_handler(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<RouteOutcome, RouteError> {
    state.router.route(inbound(&uri, headers, body)).await
}

/// Token counting is only offered by the primary provider.
async fn count_tokens_handler(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<RouteOutcome, RouteError> {
    state.router.forward(inbound(&uri, headers, body)).await
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthSnapshot> {
    Json(state.health.snapshot())
}

fn inbound(uri: &Uri, headers: HeaderMap, body: Bytes) -> InboundRequest {
    let path = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path())
        .to_string();
    InboundRequest {
        request_id: request_id(&headers),
        path,
        headers,
        body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_keeps_query() {
        let uri: Uri = "/v1/messages?beta=true".parse().unwrap();
        let request = inbound(&uri, HeaderMap::new(), Bytes::from_static(b"{}"));
        assert_eq!(request.path, "/v1/messages?beta=true");
        assert_eq!(request.request_id, "unknown");
    }
}

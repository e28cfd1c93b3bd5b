//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define proxy metrics (requests, latency, fallbacks, breaker state)
//! - Expose a Prometheus-compatible scrape endpoint when enabled
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by target, reason, status
//! - `proxy_request_duration_seconds` (histogram): latency by target
//! - `proxy_secondary_fallbacks_total` (counter): secondary failures retried on primary
//! - `proxy_breaker_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `proxy_breaker_transitions_total` (counter): transitions by destination state
//!
//! # Design Decisions
//! - Recording is always on; without an installed recorder the macros are no-ops
//! - Labels are static strings, never model names or request ids

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::resilience::CircuitState;
use crate::routing::{RouteReason, RouteTarget};

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record one routed request.
pub fn record_request(target: RouteTarget, reason: RouteReason, status: u16, elapsed: Duration) {
    ::metrics::counter!(
        "proxy_requests_total",
        "target" => target.as_str(),
        "reason" => reason.as_str(),
        "status" => status.to_string()
    )
    .increment(1);
    ::metrics::histogram!("proxy_request_duration_seconds", "target" => target.as_str())
        .record(elapsed.as_secs_f64());
}

/// Record a failed secondary attempt that was retried on primary.
pub fn record_fallback() {
    ::metrics::counter!("proxy_secondary_fallbacks_total").increment(1);
}

/// Publish the current breaker state.
pub fn record_breaker_state(state: CircuitState) {
    ::metrics::gauge!("proxy_breaker_state").set(state_value(state));
}

/// Count a breaker transition and publish the new state.
pub fn record_breaker_transition(to: CircuitState) {
    ::metrics::counter!("proxy_breaker_transitions_total", "to" => to.as_str()).increment(1);
    record_breaker_state(to);
}

fn state_value(state: CircuitState) -> f64 {
    match state {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_gauge_values() {
        assert_eq!(state_value(CircuitState::Closed), 0.0);
        assert_eq!(state_value(CircuitState::HalfOpen), 1.0);
        assert_eq!(state_value(CircuitState::Open), 2.0);
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_request(RouteTarget::Primary, RouteReason::Tier, 200, Duration::from_millis(5));
        record_fallback();
        record_breaker_transition(CircuitState::Open);
    }
}

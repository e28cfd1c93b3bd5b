//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use crate::routing::ModelFamily;

/// Root configuration for the proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Primary provider (always available, client credentials).
    pub primary: PrimaryConfig,

    /// Secondary provider (locally configured key, breaker-protected).
    pub secondary: SecondaryConfig,

    /// Circuit breaker guarding the secondary provider.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Request size limits.
    pub limits: LimitsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "127.0.0.1:8082").
    pub bind_address: String,
}

impl ListenerConfig {
    /// Replace the port, keeping the configured host.
    pub fn set_port(&mut self, port: u16) {
        self.bind_address = match self.bind_address.parse::<SocketAddr>() {
            Ok(mut addr) => {
                addr.set_port(port);
                addr.to_string()
            }
            Err(_) => format!("127.0.0.1:{}", port),
        };
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8082".to_string(),
        }
    }
}

/// Primary provider configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PrimaryConfig {
    /// Base URL; endpoint paths are appended verbatim.
    pub base_url: String,
}

impl Default for PrimaryConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.anthropic.com".to_string(),
        }
    }
}

/// Secondary provider configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecondaryConfig {
    /// Base URL of the Anthropic-compatible endpoint.
    pub base_url: String,

    /// API key. Absent means every request goes to the primary provider.
    pub api_key: Option<String>,

    /// Model name the secondary provider expects.
    pub model: String,

    /// Model families eligible for the secondary provider.
    pub tiers: Vec<ModelFamily>,

    /// Deadline for a secondary attempt to produce response headers, in seconds.
    pub attempt_timeout_secs: u64,

    /// Maximum concurrent requests in flight against the secondary provider.
    pub max_concurrent_requests: usize,
}

impl SecondaryConfig {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }
}

impl Default for SecondaryConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.z.ai/api/anthropic".to_string(),
            api_key: None,
            model: "glm-5".to_string(),
            tiers: vec![ModelFamily::Sonnet, ModelFamily::Haiku],
            attempt_timeout_secs: 120,
            max_concurrent_requests: 5,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,

    /// Seconds the circuit stays open before a half-open trial.
    pub open_duration_secs: u64,
}

impl CircuitBreakerConfig {
    pub fn open_duration(&self) -> Duration {
        Duration::from_secs(self.open_duration_secs)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration_secs: 120,
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Time allowed for the primary provider to produce response headers, in seconds.
    pub read_secs: u64,

    /// Whole-request timeout at the proxy edge, in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 10,
            read_secs: 300,
            request_secs: 600,
        }
    }
}

/// Request size limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum inbound body size in bytes. Vision payloads can be large.
    pub max_body_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: 32 * 1024 * 1024,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9464".to_string(),
        }
    }
}

//! Configuration loading from disk and the environment.

use std::fs;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

use crate::config::schema::ProxyConfig;
use crate::config::validation::{ConfigWarning, ValidationError};
use crate::routing::ModelFamily;

/// Environment variable naming an optional TOML config file.
pub const CONFIG_PATH_ENV: &str = "TIER_PROXY_CONFIG";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ProxyConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: ProxyConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Resolve configuration: defaults, then the optional file, then the environment.
///
/// `lookup` abstracts `std::env::var` so resolution can be tested without
/// touching process state. Validation is left to the caller so CLI overrides
/// can be applied first.
pub fn load<F>(path: Option<&Path>, lookup: F) -> Result<(ProxyConfig, Vec<ConfigWarning>), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match path {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };
    let warnings = apply_env(&mut config, lookup);
    Ok((config, warnings))
}

/// Overlay environment variables onto `config`.
///
/// Values that fail to parse are skipped and reported as warnings; the
/// previous value stays in effect.
pub fn apply_env<F>(config: &mut ProxyConfig, lookup: F) -> Vec<ConfigWarning>
where
    F: Fn(&str) -> Option<String>,
{
    let mut env = EnvReader {
        lookup,
        warnings: Vec::new(),
    };

    if let Some(port) = env.parse::<u16>("PORT") {
        config.listener.set_port(port);
    }
    if let Some(url) = env.string("PRIMARY_BASE_URL") {
        config.primary.base_url = url;
    }
    if let Some(key) = env.string("SECONDARY_API_KEY") {
        config.secondary.api_key = Some(key);
    }
    if let Some(url) = env.string("SECONDARY_BASE_URL") {
        config.secondary.base_url = url;
    }
    if let Some(model) = env.string("SECONDARY_MODEL") {
        config.secondary.model = model;
    }
    if let Some(tiers) = env.list::<ModelFamily>("SECONDARY_TIERS") {
        config.secondary.tiers = tiers;
    }
    if let Some(secs) = env.parse("SECONDARY_TIMEOUT") {
        config.secondary.attempt_timeout_secs = secs;
    }
    if let Some(max) = env.parse("MAX_CONCURRENT_REQUESTS") {
        config.secondary.max_concurrent_requests = max;
    }
    if let Some(threshold) = env.parse("CIRCUIT_BREAKER_THRESHOLD") {
        config.circuit_breaker.failure_threshold = threshold;
    }
    if let Some(secs) = env.parse("CIRCUIT_BREAKER_RECOVERY") {
        config.circuit_breaker.open_duration_secs = secs;
    }
    if let Some(secs) = env.parse("CONNECT_TIMEOUT") {
        config.timeouts.connect_secs = secs;
    }
    if let Some(secs) = env.parse("READ_TIMEOUT") {
        config.timeouts.read_secs = secs;
    }
    if let Some(level) = env.string("LOG_LEVEL") {
        config.observability.log_level = level.to_lowercase();
    }
    if let Some(addr) = env.string("METRICS_ADDRESS") {
        config.observability.metrics_address = addr;
        config.observability.metrics_enabled = true;
    }

    env.warnings
}

struct EnvReader<F> {
    lookup: F,
    warnings: Vec<ConfigWarning>,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Non-empty, trimmed value.
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: FromStr>(&mut self, key: &'static str) -> Option<T> {
        let raw = self.string(key)?;
        match raw.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                self.warnings.push(ConfigWarning::UnparseableEnv { key, value: raw });
                None
            }
        }
    }

    /// Comma-separated list; one bad item rejects the whole value.
    fn list<T: FromStr>(&mut self, key: &'static str) -> Option<Vec<T>> {
        let raw = self.string(key)?;
        let parsed: Result<Vec<T>, _> = raw
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::parse)
            .collect();
        match parsed {
            Ok(items) => Some(items),
            Err(_) => {
                self.warnings.push(ConfigWarning::UnparseableEnv { key, value: raw });
                None
            }
        }
    }
}

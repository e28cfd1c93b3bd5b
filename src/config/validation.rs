//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds >= 1, durations > 0, addresses parse)
//! - Report secondary-provider problems as warnings, not errors
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<warnings, errors>
//! - A broken secondary provider degrades routing to primary-only; it never
//!   stops the proxy from starting

use std::fmt;
use std::net::SocketAddr;
use thiserror::Error;
use url::Url;

use crate::config::schema::ProxyConfig;
use crate::routing::ModelFamily;

/// A configuration problem that prevents the proxy from starting.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("listener.bind_address '{0}' is not a valid socket address")]
    InvalidBindAddress(String),

    #[error("observability.metrics_address '{0}' is not a valid socket address")]
    InvalidMetricsAddress(String),

    #[error("primary.base_url '{0}' is not a valid http(s) URL")]
    InvalidPrimaryUrl(String),

    #[error("circuit_breaker.failure_threshold must be at least 1")]
    ZeroThreshold,

    #[error("{0} must be greater than zero")]
    NotPositive(&'static str),
}

/// A configuration problem the proxy degrades around.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// No secondary API key: all traffic goes to the primary provider.
    MissingSecondaryKey,
    /// The secondary API key cannot be sent as an HTTP header.
    InvalidSecondaryKey,
    /// The secondary base URL does not parse.
    InvalidSecondaryUrl(String),
    /// A family that is always served by the primary provider was listed as a secondary tier.
    PinnedFamily(ModelFamily),
    /// A secondary key is configured but no tiers are routed to it.
    NoSecondaryTiers,
    /// An environment variable could not be parsed and was ignored.
    UnparseableEnv { key: &'static str, value: String },
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigWarning::MissingSecondaryKey => {
                write!(f, "secondary API key not set; all tiers route to the primary provider")
            }
            ConfigWarning::InvalidSecondaryKey => {
                write!(f, "secondary API key is not a valid header value; all tiers route to the primary provider")
            }
            ConfigWarning::InvalidSecondaryUrl(url) => {
                write!(f, "secondary base URL '{}' is invalid; all tiers route to the primary provider", url)
            }
            ConfigWarning::PinnedFamily(family) => {
                write!(f, "'{}' is always served by the primary provider; ignoring it in secondary.tiers", family)
            }
            ConfigWarning::NoSecondaryTiers => {
                write!(f, "secondary provider configured but secondary.tiers is empty")
            }
            ConfigWarning::UnparseableEnv { key, value } => {
                write!(f, "ignoring {}='{}': not a valid value", key, value)
            }
        }
    }
}

/// Validate a fully-resolved configuration.
pub fn validate_config(config: &ProxyConfig) -> Result<Vec<ConfigWarning>, Vec<ValidationError>> {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidBindAddress(
            config.listener.bind_address.clone(),
        ));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidMetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if !is_http_url(&config.primary.base_url) {
        errors.push(ValidationError::InvalidPrimaryUrl(config.primary.base_url.clone()));
    }

    if config.circuit_breaker.failure_threshold == 0 {
        errors.push(ValidationError::ZeroThreshold);
    }

    let durations = [
        ("circuit_breaker.open_duration_secs", config.circuit_breaker.open_duration_secs),
        ("secondary.attempt_timeout_secs", config.secondary.attempt_timeout_secs),
        ("timeouts.connect_secs", config.timeouts.connect_secs),
        ("timeouts.read_secs", config.timeouts.read_secs),
        ("timeouts.request_secs", config.timeouts.request_secs),
    ];
    for (field, value) in durations {
        if value == 0 {
            errors.push(ValidationError::NotPositive(field));
        }
    }

    if config.secondary.max_concurrent_requests == 0 {
        errors.push(ValidationError::NotPositive("secondary.max_concurrent_requests"));
    }

    match config.secondary.api_key.as_deref() {
        None => warnings.push(ConfigWarning::MissingSecondaryKey),
        Some(key) if !is_valid_key(key) => warnings.push(ConfigWarning::InvalidSecondaryKey),
        Some(_) => {
            if !is_http_url(&config.secondary.base_url) {
                warnings.push(ConfigWarning::InvalidSecondaryUrl(
                    config.secondary.base_url.clone(),
                ));
            }
            for family in &config.secondary.tiers {
                if !family.can_use_secondary() {
                    warnings.push(ConfigWarning::PinnedFamily(*family));
                }
            }
            if !config.secondary.tiers.iter().any(|f| f.can_use_secondary()) {
                warnings.push(ConfigWarning::NoSecondaryTiers);
            }
        }
    }

    if errors.is_empty() {
        Ok(warnings)
    } else {
        Err(errors)
    }
}

/// A key is usable when it is non-empty and every byte is visible ASCII.
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty() && key.bytes().all(|b| b.is_ascii_graphic())
}

fn is_http_url(raw: &str) -> bool {
    Url::parse(raw)
        .map(|url| matches!(url.scheme(), "http" | "https"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_key() -> ProxyConfig {
        let mut config = ProxyConfig::default();
        config.secondary.api_key = Some("sk-live-123".into());
        config
    }

    #[test]
    fn test_defaults_only_warn_about_missing_key() {
        let warnings = validate_config(&ProxyConfig::default()).unwrap();
        assert_eq!(warnings, vec![ConfigWarning::MissingSecondaryKey]);
    }

    #[test]
    fn test_valid_secondary_has_no_warnings() {
        assert!(validate_config(&with_key()).unwrap().is_empty());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = with_key();
        config.listener.bind_address = "localhost".into();
        config.circuit_breaker.failure_threshold = 0;
        config.circuit_breaker.open_duration_secs = 0;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.contains(&ValidationError::ZeroThreshold));
        assert!(errors.contains(&ValidationError::NotPositive(
            "circuit_breaker.open_duration_secs"
        )));
    }

    #[test]
    fn test_secondary_problems_are_warnings() {
        let mut config = with_key();
        config.secondary.api_key = Some("has space".into());
        assert_eq!(
            validate_config(&config).unwrap(),
            vec![ConfigWarning::InvalidSecondaryKey]
        );

        let mut config = with_key();
        config.secondary.base_url = "ftp://example.com".into();
        assert_eq!(
            validate_config(&config).unwrap(),
            vec![ConfigWarning::InvalidSecondaryUrl("ftp://example.com".into())]
        );
    }

    #[test]
    fn test_opus_cannot_be_a_secondary_tier() {
        let mut config = with_key();
        config.secondary.tiers = vec![ModelFamily::Opus];
        let warnings = validate_config(&config).unwrap();
        assert_eq!(
            warnings,
            vec![
                ConfigWarning::PinnedFamily(ModelFamily::Opus),
                ConfigWarning::NoSecondaryTiers,
            ]
        );
    }

    #[test]
    fn test_key_validity() {
        assert!(is_valid_key("sk-abc.DEF_123"));
        assert!(!is_valid_key(""));
        assert!(!is_valid_key("abc\n"));
        assert!(!is_valid_key("clé"));
    }
}

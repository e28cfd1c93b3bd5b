//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! defaults
//!     → loader.rs (optional TOML file, then environment overlay)
//!     → CLI overrides (lifecycle/startup.rs)
//!     → validation.rs (semantic checks: errors stop startup, warnings degrade)
//!     → ProxyConfig (validated, immutable)
//!     → consumed once to build the router, breaker and server
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow an empty environment
//! - A missing or broken secondary provider is a warning, never a startup failure

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load, ConfigError, CONFIG_PATH_ENV};
pub use schema::{
    CircuitBreakerConfig, LimitsConfig, ListenerConfig, ObservabilityConfig, PrimaryConfig, ProxyConfig,
    SecondaryConfig, TimeoutConfig,
};
pub use validation::{validate_config, ConfigWarning, ValidationError};

//! Tier-routing proxy library.
//!
//! Routes Anthropic-style message requests between a primary provider and a
//! cheaper secondary provider, guarded by a circuit breaker.

pub mod config;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod routing;
pub mod upstream;

pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;

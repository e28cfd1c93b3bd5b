//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured tracing events, request_id on every line)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stderr (tracing-subscriber fmt layer)
//!     → Metrics endpoint (Prometheus scrape, opt-in)
//! ```
//!
//! # Design Decisions
//! - `RUST_LOG` always wins over the configured level
//! - Request ID flows through router logs and response headers
//! - Metric calls are no-ops until a recorder is installed

pub mod logging;
pub mod metrics;

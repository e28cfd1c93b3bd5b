//! Health reporting subsystem.
//!
//! # Data Flow
//! ```text
//! GET /health
//!     → reporter.rs (HealthReporter::snapshot)
//!         ├─ static routing table (captured from the Router at startup)
//!         └─ breaker view (lock-free load of the published state)
//!     → HealthSnapshot serialized as JSON
//! ```
//!
//! # Design Decisions
//! - Read-only: never calls a provider, never mutates the breaker
//! - Constant time; never waits on the breaker mutex or in-flight requests
//! - `degraded` while the breaker is open or half-open

pub mod reporter;

pub use reporter::{BreakerSnapshot, HealthReporter, HealthSnapshot, HealthStatus};

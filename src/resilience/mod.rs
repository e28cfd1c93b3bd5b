//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request eligible for the secondary provider:
//!     → circuit_breaker.rs (admit? closed / half-open trial / open)
//!     → timeouts.rs (deadline on the secondary attempt)
//!     → outcome recorded back into circuit_breaker.rs
//!     → on failure: router retries once against the primary provider
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every upstream call has a deadline
//! - No transport-level retries; the only retry is the primary fallback
//! - Circuit breaker prevents a degraded secondary from stalling sessions

pub mod circuit_breaker;
pub mod timeouts;

pub use circuit_breaker::{Admission, BreakerView, CircuitBreaker, CircuitState};
pub use timeouts::with_deadline;

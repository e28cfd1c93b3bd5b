//! Upstream provider clients.
//!
//! # Data Flow
//! ```text
//! Router ──► Provider::request_headers(inbound)
//!               │
//!               ▼
//!        Provider::send(path, headers, body)
//!               │
//!        ┌──────┴──────────────┐
//!        ▼                     ▼
//!   UpstreamResponse      UpstreamError
//!   (2xx streaming,       (transport, timeout,
//!    4xx/5xx buffered)     server fault, bad URL)
//! ```
//!
//! # Design Decisions
//! - Both providers share one pooled `reqwest::Client`
//! - Error bodies are buffered so faults can be classified before relaying
//! - Success bodies are never buffered; streaming responses pass through

pub mod error;
pub mod provider;
pub mod response;

pub use error::UpstreamError;
pub use provider::{build_client, Provider};
pub use response::{ResponseBody, UpstreamResponse};

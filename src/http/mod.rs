//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware stack)
//!     → request.rs (short request ID, set before tracing)
//!     → routing::Router (classify, decide, forward)
//!     → response.rs (strip hop-by-hop, add x-route-* headers, stream body)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{ShortRequestId, X_REQUEST_ID};
pub use response::{X_ROUTE_REASON, X_ROUTE_TARGET};
pub use server::{AppState, HttpServer};

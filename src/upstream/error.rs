//! Upstream error taxonomy.

use axum::http::StatusCode;
use std::time::Duration;
use thiserror::Error;

use crate::upstream::response::UpstreamResponse;

/// Errors from one upstream attempt.
///
/// A 4xx response is not an error: it is relayed to the client and counts as
/// a success for the breaker.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Connect, TLS or I/O failure before response headers arrived.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// No response headers within the deadline.
    #[error("no response within {}s", .0.as_secs_f32())]
    Timeout(Duration),

    /// The provider answered with a server fault.
    #[error("upstream server error ({})", .0.status)]
    Server(UpstreamResponse),

    /// The endpoint URL could not be built.
    #[error("invalid upstream URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl UpstreamError {
    pub fn is_timeout(&self) -> bool {
        match self {
            UpstreamError::Timeout(_) => true,
            UpstreamError::Transport(e) => e.is_timeout(),
            _ => false,
        }
    }

    /// Status returned to the client when this error cannot be relayed as-is.
    pub fn status_code(&self) -> StatusCode {
        match self {
            UpstreamError::Server(response) => response.status,
            _ if self.is_timeout() => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::BAD_GATEWAY,
        }
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            UpstreamError::Transport(_) if self.is_timeout() => "timeout",
            UpstreamError::Transport(_) => "transport",
            UpstreamError::Timeout(_) => "timeout",
            UpstreamError::Server(_) => "server",
            UpstreamError::InvalidUrl(_) => "config",
        }
    }
}

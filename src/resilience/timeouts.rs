//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap upstream calls with a deadline
//! - Cancel the in-flight call cleanly when the deadline passes
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Timeout errors are distinct from other errors
//! - Timed-out requests count as secondary failures and map to 504

use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

use crate::upstream::UpstreamError;

/// Run `call`, failing with [`UpstreamError::Timeout`] if it takes longer than `deadline`.
///
/// The deadline covers the time until the upstream produces response
/// headers; streamed bodies are not bounded here.
pub async fn with_deadline<F, T>(deadline: Duration, call: F) -> Result<T, UpstreamError>
where
    F: Future<Output = Result<T, UpstreamError>>,
{
    match timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(UpstreamError::Timeout(deadline)),
    }
}

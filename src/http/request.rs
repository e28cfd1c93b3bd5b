//! Request identification.
//!
//! # Responsibilities
//! - Generate a short request ID for every inbound request
//! - Read the ID back in handlers for log correlation
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - IDs are 8 hex characters: short enough to read in a terminal log,
//!   unique enough for one local session
//! - A client-supplied `x-request-id` is kept as-is

use axum::http::{HeaderMap, HeaderName, HeaderValue, Request};
use tower_http::request_id::{MakeRequestId, RequestId};
use uuid::Uuid;

/// Header carrying the request ID.
pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Generates 8-hex-character request IDs from a v4 UUID.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShortRequestId;

impl MakeRequestId for ShortRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&short_id()).ok().map(RequestId::new)
    }
}

/// First 8 hex characters of a fresh v4 UUID.
pub fn short_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

/// The request ID set by the middleware, or `"unknown"`.
pub fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_id_format() {
        let id = short_id();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(short_id(), short_id());
    }

    #[test]
    fn test_make_request_id() {
        let request = Request::new(());
        let id = ShortRequestId.make_request_id(&request).unwrap();
        assert_eq!(id.header_value().len(), 8);
    }

    #[test]
    fn test_request_id_lookup() {
        let mut headers = HeaderMap::new();
        assert_eq!(request_id(&headers), "unknown");
        headers.insert(X_REQUEST_ID, HeaderValue::from_static("abcd1234"));
        assert_eq!(request_id(&headers), "abcd1234");
    }
}

//! Response handling and transformation.
//!
//! # Responsibilities
//! - Turn a routed upstream response into a client response
//! - Strip hop-by-hop headers and attach routing headers
//! - Render errors as Anthropic-style JSON bodies
//!
//! # Design Decisions
//! - Streaming responses are relayed chunk by chunk, never buffered
//! - `content-length` is dropped; the relayed body sets its own framing
//! - Upstream timeouts result in 504 Gateway Timeout, other failures in 502

use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::TryStreamExt;
use serde_json::json;

use crate::routing::{RouteError, RouteOutcome, RoutingDecision};
use crate::upstream::{ResponseBody, UpstreamResponse};

/// Routing target header.
pub const X_ROUTE_TARGET: HeaderName = HeaderName::from_static("x-route-target");
/// Routing reason header.
pub const X_ROUTE_REASON: HeaderName = HeaderName::from_static("x-route-reason");

/// Headers never relayed from upstream.
const STRIPPED_HEADERS: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

impl IntoResponse for RouteOutcome {
    fn into_response(self) -> Response {
        let RouteOutcome { decision, response } = self;
        let UpstreamResponse { status, headers, body } = response;

        let body = match body {
            ResponseBody::Buffered(bytes) => Body::from(bytes),
            ResponseBody::Streaming(upstream) => {
                Body::from_stream(upstream.bytes_stream().inspect_err(|e| {
                    tracing::warn!(error = %e, "Upstream stream ended with an error");
                }))
            }
        };

        let mut out = Response::new(body);
        *out.status_mut() = status;
        relay_headers(&headers, out.headers_mut());
        attach_decision(out.headers_mut(), decision);
        out
    }
}

impl IntoResponse for RouteError {
    fn into_response(self) -> Response {
        let status = self.error.status_code();
        let error_type = if status == StatusCode::GATEWAY_TIMEOUT {
            "timeout_error"
        } else {
            "api_error"
        };
        let body = json!({
            "type": "error",
            "error": {
                "type": error_type,
                "message": format!("{} provider unavailable: {}", self.decision.target, self.error),
            }
        });

        let mut out = (status, Json(body)).into_response();
        attach_decision(out.headers_mut(), self.decision);
        out
    }
}

/// Copy end-to-end headers, dropping hop-by-hop ones and any named by `Connection`.
pub fn relay_headers(from: &HeaderMap, to: &mut HeaderMap) {
    let connection_listed: Vec<String> = from
        .get_all("connection")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .collect();

    for (name, value) in from {
        let name_str = name.as_str();
        if STRIPPED_HEADERS.contains(&name_str) || connection_listed.iter().any(|c| c == name_str) {
            continue;
        }
        to.append(name.clone(), value.clone());
    }
}

fn attach_decision(headers: &mut HeaderMap, decision: RoutingDecision) {
    headers.insert(X_ROUTE_TARGET, HeaderValue::from_static(decision.target.as_str()));
    headers.insert(X_ROUTE_REASON, HeaderValue::from_static(decision.reason.as_str()));
}

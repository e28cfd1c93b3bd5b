//! Upstream response representation.

use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode};

/// Marker some Anthropic-compatible providers embed in 4xx bodies for internal faults.
const DISGUISED_FAULT_MARKERS: [&str; 2] = [r#""code":"500""#, r#""code": "500""#];

/// Response from a provider, ready to relay.
#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ResponseBody,
}

/// Successful bodies stream through; error bodies are buffered for inspection.
#[derive(Debug)]
pub enum ResponseBody {
    Buffered(Bytes),
    Streaming(reqwest::Response),
}

impl UpstreamResponse {
    /// Buffer error bodies, keep successful bodies streaming.
    pub async fn from_reqwest(response: reqwest::Response) -> Result<Self, reqwest::Error> {
        let status = response.status();
        let headers = response.headers().clone();
        let body = if status.is_client_error() || status.is_server_error() {
            ResponseBody::Buffered(response.bytes().await?)
        } else {
            ResponseBody::Streaming(response)
        };
        Ok(Self { status, headers, body })
    }

    pub fn buffered(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: ResponseBody::Buffered(body.into()),
        }
    }

    /// Whether the provider itself failed, as opposed to rejecting the request.
    ///
    /// 5xx always counts. A 400 counts only when its body carries an embedded
    /// internal-error code.
    pub fn is_server_fault(&self) -> bool {
        if self.status.is_server_error() {
            return true;
        }
        if self.status != StatusCode::BAD_REQUEST {
            return false;
        }
        match &self.body {
            ResponseBody::Buffered(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                DISGUISED_FAULT_MARKERS.iter().any(|m| text.contains(m))
            }
            ResponseBody::Streaming(_) => false,
        }
    }

    /// First bytes of a buffered body, for logs.
    pub fn preview(&self, max: usize) -> String {
        match &self.body {
            ResponseBody::Buffered(bytes) => {
                let end = bytes.len().min(max);
                String::from_utf8_lossy(&bytes[..end]).into_owned()
            }
            ResponseBody::Streaming(_) => String::new(),
        }
    }
}

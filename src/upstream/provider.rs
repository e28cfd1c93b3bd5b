//! Provider endpoints.
//!
//! # Responsibilities
//! - Hold the base URL and credential policy of one upstream provider
//! - Build outbound headers from the inbound request
//! - Send one request and hand back a relayable response
//!
//! # Design Decisions
//! - One shared `reqwest::Client` (connection pool) for both providers
//! - Primary uses the client's own credentials; secondary uses the local key
//! - Base URLs are joined by concatenation so path prefixes survive

use axum::body::Bytes;
use axum::http::header::{HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use axum::http::HeaderMap;
use std::fmt;
use std::time::Duration;
use url::Url;

use crate::config::{SecondaryConfig, TimeoutConfig};
use crate::config::validation::is_valid_key;
use crate::upstream::{UpstreamError, UpstreamResponse};

/// Headers copied from the client to the primary provider.
const PRIMARY_FORWARDED: [&str; 4] = ["authorization", "x-api-key", "anthropic-version", "anthropic-beta"];

const X_API_KEY: HeaderName = HeaderName::from_static("x-api-key");
const ANTHROPIC_VERSION: &str = "anthropic-version";

/// Credential policy of a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProviderKind {
    Primary,
    Secondary,
}

/// Build the shared upstream HTTP client.
///
/// Redirects are relayed to the client, never followed.
pub fn build_client(timeouts: &TimeoutConfig) -> Result<reqwest::Client, UpstreamError> {
    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(timeouts.connect_secs))
        .redirect(reqwest::redirect::Policy::none())
        .pool_idle_timeout(Duration::from_secs(30))
        .pool_max_idle_per_host(20)
        .build()?;
    Ok(client)
}

/// An upstream provider endpoint.
#[derive(Clone)]
pub struct Provider {
    kind: ProviderKind,
    base_url: String,
    client: reqwest::Client,
    /// Fixed credential headers (secondary only).
    credentials: HeaderMap,
}

impl Provider {
    /// Primary provider: forwards the client's own credentials.
    pub fn primary(base_url: &str, client: reqwest::Client) -> Result<Self, UpstreamError> {
        Ok(Self {
            kind: ProviderKind::Primary,
            base_url: normalize_base(base_url)?,
            client,
            credentials: HeaderMap::new(),
        })
    }

    /// Secondary provider, or `None` when its credential or URL is unusable.
    pub fn secondary(config: &SecondaryConfig, client: reqwest::Client) -> Option<Self> {
        let key = config.api_key.as_deref().filter(|k| is_valid_key(k))?;
        let base_url = match normalize_base(&config.base_url) {
            Ok(url) if url.starts_with("http://") || url.starts_with("https://") => url,
            Ok(url) => {
                tracing::warn!(base_url = %url, "Secondary provider disabled: not an http(s) URL");
                return None;
            }
            Err(e) => {
                tracing::warn!(base_url = %config.base_url, error = %e, "Secondary provider disabled");
                return None;
            }
        };

        let mut bearer = HeaderValue::from_str(&format!("Bearer {}", key)).ok()?;
        bearer.set_sensitive(true);
        let mut raw = HeaderValue::from_str(key).ok()?;
        raw.set_sensitive(true);

        let mut credentials = HeaderMap::new();
        credentials.insert(AUTHORIZATION, bearer);
        credentials.insert(X_API_KEY, raw);

        Some(Self {
            kind: ProviderKind::Secondary,
            base_url,
            client,
            credentials,
        })
    }

    /// Full URL for an endpoint path such as `/v1/messages`.
    pub fn endpoint(&self, path: &str) -> Result<Url, UpstreamError> {
        Ok(Url::parse(&format!("{}{}", self.base_url, path))?)
    }

    /// Outbound headers for a request the client sent with `inbound`.
    pub fn request_headers(&self, inbound: &HeaderMap, stream: bool) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if stream {
            headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        }

        match self.kind {
            ProviderKind::Primary => {
                for name in PRIMARY_FORWARDED {
                    for value in inbound.get_all(name) {
                        headers.append(HeaderName::from_static(name), value.clone());
                    }
                }
            }
            ProviderKind::Secondary => {
                if let Some(version) = inbound.get(ANTHROPIC_VERSION) {
                    headers.insert(HeaderName::from_static(ANTHROPIC_VERSION), version.clone());
                }
                headers.extend(self.credentials.clone());
            }
        }
        headers
    }

    /// POST `body` to `path`. Error bodies are buffered, success bodies stream.
    pub async fn send(&self, path: &str, headers: HeaderMap, body: Bytes) -> Result<UpstreamResponse, UpstreamError> {
        let url = self.endpoint(path)?;
        let response = self
            .client
            .post(url)
            .headers(headers)
            .body(body)
            .send()
            .await?;
        UpstreamResponse::from_reqwest(response)
            .await
            .map_err(UpstreamError::from)
    }
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("kind", &self.kind)
            .field("base_url", &self.base_url)
            .field("has_credentials", &!self.credentials.is_empty())
            .finish()
    }
}

fn normalize_base(raw: &str) -> Result<String, UpstreamError> {
    let trimmed = raw.trim().trim_end_matches('/');
    Url::parse(trimmed)?;
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SecondaryConfig;

    fn secondary_config(key: Option<&str>) -> SecondaryConfig {
        SecondaryConfig {
            api_key: key.map(str::to_string),
            ..SecondaryConfig::default()
        }
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let provider = Provider::primary("https://api.z.ai/api/anthropic/", reqwest::Client::new()).unwrap();
        assert_eq!(
            provider.endpoint("/v1/messages").unwrap().as_str(),
            "https://api.z.ai/api/anthropic/v1/messages"
        );
    }

    #[test]
    fn test_secondary_requires_usable_key() {
        assert!(Provider::secondary(&secondary_config(None), reqwest::Client::new()).is_none());
        assert!(Provider::secondary(&secondary_config(Some("bad key")), reqwest::Client::new()).is_none());
        assert!(Provider::secondary(&secondary_config(Some("sk-ok")), reqwest::Client::new()).is_some());
    }

    #[test]
    fn test_primary_forwards_client_credentials_only() {
        let provider = Provider::primary("https://api.anthropic.com", reqwest::Client::new()).unwrap();
        let mut inbound = HeaderMap::new();
        inbound.insert("authorization", HeaderValue::from_static("Bearer oauth-token"));
        inbound.insert("anthropic-beta", HeaderValue::from_static("tools-2024"));
        inbound.insert("cookie", HeaderValue::from_static("secret"));
        inbound.insert("accept-encoding", HeaderValue::from_static("gzip"));

        let headers = provider.request_headers(&inbound, false);
        assert_eq!(headers["authorization"], "Bearer oauth-token");
        assert_eq!(headers["anthropic-beta"], "tools-2024");
        assert_eq!(headers["content-type"], "application/json");
        assert!(headers.get("cookie").is_none());
        assert!(headers.get("accept-encoding").is_none());
        assert!(headers.get("accept").is_none());
    }

    #[test]
    fn test_secondary_replaces_credentials() {
        let provider = Provider::secondary(&secondary_config(Some("sk-zai")), reqwest::Client::new()).unwrap();
        let mut inbound = HeaderMap::new();
        inbound.insert("authorization", HeaderValue::from_static("Bearer oauth-token"));
        inbound.insert("anthropic-version", HeaderValue::from_static("2023-06-01"));
        inbound.insert("anthropic-beta", HeaderValue::from_static("tools-2024"));

        let headers = provider.request_headers(&inbound, true);
        assert_eq!(headers["authorization"], "Bearer sk-zai");
        assert_eq!(headers["x-api-key"], "sk-zai");
        assert_eq!(headers["anthropic-version"], "2023-06-01");
        assert_eq!(headers["accept"], "text/event-stream");
        assert!(headers.get("anthropic-beta").is_none());
    }

    #[test]
    fn test_debug_hides_key() {
        let provider = Provider::secondary(&secondary_config(Some("sk-secret")), reqwest::Client::new()).unwrap();
        assert!(!format!("{:?}", provider).contains("sk-secret"));
    }
}

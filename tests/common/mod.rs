//! Shared utilities for integration tests.
//!
//! Upstream providers are raw-TCP mocks that record every request they
//! receive and answer from a closure indexed by call number.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use tier_proxy::config::ProxyConfig;
use tier_proxy::http::HttpServer;
use tier_proxy::lifecycle::Shutdown;

/// A request as seen by a mock upstream.
#[derive(Debug, Clone)]
pub struct Captured {
    pub path: String,
    /// Lowercased header names.
    pub headers: HashMap<String, String>,
    pub body: serde_json::Value,
}

/// What a mock upstream answers with.
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
    pub delay: Option<Duration>,
    pub headers: Vec<(&'static str, String)>,
}

impl Reply {
    pub fn json(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: body.into(),
            delay: None,
            headers: Vec::new(),
        }
    }

    /// A minimal successful message response naming `model`.
    pub fn message(model: &str) -> Self {
        Self::json(
            200,
            format!(
                r#"{{"id":"msg_1","type":"message","role":"assistant","model":"{}","content":[{{"type":"text","text":"ok"}}]}}"#,
                model
            ),
        )
    }

    pub fn sse(events: &[&str]) -> Self {
        Self {
            status: 200,
            content_type: "text/event-stream",
            body: events.concat(),
            delay: None,
            headers: Vec::new(),
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }
}

/// Handle to a running mock upstream.
#[derive(Clone)]
pub struct MockUpstream {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<Captured>>>,
    load: Arc<Load>,
}

/// Requests currently being answered, and the most seen at once.
#[derive(Default)]
struct Load {
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl MockUpstream {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn hits(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<Captured> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last(&self) -> Captured {
        self.requests
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("mock upstream received no requests")
    }

    /// Most requests this upstream was answering at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.load.peak.load(Ordering::SeqCst)
    }
}

/// Start a mock upstream that always gives the same reply.
pub async fn start_fixed_upstream(reply: Reply) -> MockUpstream {
    start_programmable_upstream(move |_| reply.clone()).await
}

/// Start a mock upstream whose reply depends on the 0-based call number.
pub async fn start_programmable_upstream<F>(f: F) -> MockUpstream
where
    F: Fn(usize) -> Reply + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let load = Arc::new(Load::default());
    let f = Arc::new(f);

    let recorded = requests.clone();
    let tracked = load.clone();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let f = f.clone();
            let recorded = recorded.clone();
            let tracked = tracked.clone();
            tokio::spawn(async move {
                handle(socket, f, recorded, tracked).await;
            });
        }
    });

    MockUpstream { addr, requests, load }
}

async fn handle<F>(mut socket: TcpStream, f: Arc<F>, recorded: Arc<Mutex<Vec<Captured>>>, load: Arc<Load>)
where
    F: Fn(usize) -> Reply,
{
    let Some(captured) = read_request(&mut socket).await else {
        return;
    };
    let index = {
        let mut requests = recorded.lock().unwrap();
        requests.push(captured);
        requests.len() - 1
    };
    let active = load.active.fetch_add(1, Ordering::SeqCst) + 1;
    load.peak.fetch_max(active, Ordering::SeqCst);

    let reply = (*f)(index);
    if let Some(delay) = reply.delay {
        tokio::time::sleep(delay).await;
    }

    let reason = reqwest::StatusCode::from_u16(reply.status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Unknown");
    load.active.fetch_sub(1, Ordering::SeqCst);

    let extra: String = reply
        .headers
        .iter()
        .map(|(name, value)| format!("{}: {}\r\n", name, value))
        .collect();
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\n{}Connection: close\r\n\r\n{}",
        reply.status,
        reason,
        reply.content_type,
        reply.body.len(),
        extra,
        reply.body
    );
    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;
}

async fn read_request(socket: &mut TcpStream) -> Option<Captured> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];

    let header_end = loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.lines();
    let request_line = lines.next()?;
    let path = request_line.split_whitespace().nth(1)?.to_string();

    let headers: HashMap<String, String> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();

    let content_length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    while buf.len() < header_end + content_length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let body_end = buf.len().min(header_end + content_length);
    let body = serde_json::from_slice(&buf[header_end..body_end]).unwrap_or(serde_json::Value::Null);

    Some(Captured { path, headers, body })
}

/// A URL nothing is listening on.
pub async fn closed_port() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

/// Running proxy under test.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
}

impl TestProxy {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestProxy {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Config pointing both providers at the given URLs, with a secondary key.
pub fn config_for(primary: &str, secondary: &str) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.primary.base_url = primary.to_string();
    config.secondary.base_url = secondary.to_string();
    config.secondary.api_key = Some("sk-secondary-test".into());
    config.secondary.attempt_timeout_secs = 2;
    config.timeouts.connect_secs = 1;
    config.timeouts.read_secs = 5;
    config
}

/// Start the proxy on an ephemeral port.
pub async fn start_proxy(config: ProxyConfig) -> TestProxy {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let server = HttpServer::new(config).unwrap();
    let server_shutdown = shutdown.subscribe();

    tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });

    TestProxy { addr, shutdown }
}

/// Non-pooled client that ignores system proxies.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

/// Request body for `model` with no special features.
pub fn message_body(model: &str) -> serde_json::Value {
    serde_json::json!({
        "model": model,
        "max_tokens": 64,
        "messages": [{"role": "user", "content": "hello"}]
    })
}

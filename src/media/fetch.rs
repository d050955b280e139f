//! Outbound HTTP transport
//!
//! The pipeline talks to upstreams through the [`Upstream`] trait so that
//! the network can be replaced in tests. The production implementation,
//! [`ReqwestUpstream`], issues exactly one request per call:
//! - redirects disabled (the pipeline follows them itself, re-validating)
//! - the connection pinned to the addresses the SSRF guard already checked
//! - the body returned as a stream so size limits apply while reading

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use reqwest::Client;
use thiserror::Error;
use url::Url;

/// Accept header sent upstream
pub const ACCEPT_MEDIA: &str = "image/*,video/*,audio/*,*/*";

const ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

/// Some CDNs refuse non-browser agents
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Transport failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("body read failed: {0}")]
    Body(String),
}

/// One outbound GET
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub url: Url,
    /// Addresses validated by the SSRF guard; the connection must use these
    pub resolved: Vec<IpAddr>,
    pub headers: Vec<(String, String)>,
}

/// Status, selected headers and a streaming body
pub struct UpstreamResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub location: Option<String>,
    pub body: BoxStream<'static, Result<Bytes, UpstreamError>>,
}

impl fmt::Debug for UpstreamResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamResponse")
            .field("status", &self.status)
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

impl UpstreamResponse {
    pub fn is_redirect(&self) -> bool {
        matches!(self.status, 301 | 302 | 303 | 307 | 308)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Outbound transport seam
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn get(&self, request: UpstreamRequest) -> Result<UpstreamResponse, UpstreamError>;
}

/// Headers for a request to `url`.
///
/// TikTok and Spotify CDNs get a browser user-agent and the referer they
/// expect; everything else gets `default_user_agent`.
pub fn outbound_headers(url: &Url, default_user_agent: &str) -> Vec<(String, String)> {
    let mut headers = vec![
        ("Accept".to_string(), ACCEPT_MEDIA.to_string()),
        ("Accept-Language".to_string(), ACCEPT_LANGUAGE.to_string()),
    ];

    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    if host.contains("tiktok") {
        headers.push(("User-Agent".into(), BROWSER_USER_AGENT.into()));
        headers.push(("Referer".into(), "https://www.tiktok.com/".into()));
        headers.push(("Origin".into(), "https://www.tiktok.com".into()));
    } else if host.contains("spotify") || host.contains("scdn.co") {
        headers.push(("User-Agent".into(), BROWSER_USER_AGENT.into()));
        headers.push(("Referer".into(), "https://open.spotify.com/".into()));
    } else {
        headers.push(("User-Agent".into(), default_user_agent.to_string()));
    }
    headers
}

/// reqwest-backed transport
#[derive(Debug, Clone)]
pub struct ReqwestUpstream {
    timeout: Duration,
}

impl ReqwestUpstream {
    /// `timeout` bounds a single request; the pipeline applies the overall
    /// deadline across hops.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn client_for(&self, request: &UpstreamRequest) -> Result<Client, UpstreamError> {
        let mut builder = Client::builder()
            .timeout(self.timeout)
            .redirect(reqwest::redirect::Policy::none());

        if let Some(host) = request.url.host_str() {
            // IP literals connect directly; names are pinned to checked addresses
            if host.parse::<IpAddr>().is_err() && !request.resolved.is_empty() {
                let port = request.url.port_or_known_default().unwrap_or(443);
                let addrs: Vec<SocketAddr> = request
                    .resolved
                    .iter()
                    .map(|ip| SocketAddr::new(*ip, port))
                    .collect();
                builder = builder.resolve_to_addrs(host, &addrs);
            }
        }

        builder
            .build()
            .map_err(|e| UpstreamError::Request(format!("failed to create HTTP client: {}", e)))
    }
}

fn map_reqwest_error(e: reqwest::Error) -> UpstreamError {
    if e.is_timeout() {
        UpstreamError::Timeout
    } else if e.is_connect() {
        UpstreamError::Connect(e.to_string())
    } else {
        UpstreamError::Request(e.to_string())
    }
}

#[async_trait]
impl Upstream for ReqwestUpstream {
    async fn get(&self, request: UpstreamRequest) -> Result<UpstreamResponse, UpstreamError> {
        let client = self.client_for(&request)?;

        let mut builder = client.get(request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;

        let header = |name: reqwest::header::HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string())
        };
        let content_type = header(reqwest::header::CONTENT_TYPE);
        let location = header(reqwest::header::LOCATION);

        Ok(UpstreamResponse {
            status: response.status().as_u16(),
            content_type,
            content_length: response.content_length(),
            location,
            body: response
                .bytes_stream()
                .map(|chunk| {
                    chunk.map_err(|e| {
                        if e.is_timeout() {
                            UpstreamError::Timeout
                        } else {
                            UpstreamError::Body(e.to_string())
                        }
                    })
                })
                .boxed(),
        })
    }
}

//! Shared fixtures for integration tests: a scripted upstream and a relay
//! state wired to fixed DNS answers.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use parking_lot::Mutex;

use media_relay::config::PolicyConfig;
use media_relay::media::{
    MediaFetchPipeline, ResponseCache, Upstream, UpstreamError, UpstreamRequest, UpstreamResponse,
};
use media_relay::security::{SsrfGuard, StaticResolver};
use media_relay::server::AppState;

pub const PUBLIC_IP: &str = "93.184.216.34";

/// Scripted reply for one URL
#[derive(Clone, Default)]
pub struct Reply {
    pub status: u16,
    pub content_type: Option<&'static str>,
    pub content_length: Option<u64>,
    pub location: Option<&'static str>,
    pub body: Vec<u8>,
    pub delay: Option<Duration>,
}

pub fn ok(content_type: &'static str, body: &[u8]) -> Reply {
    Reply {
        status: 200,
        content_type: Some(content_type),
        body: body.to_vec(),
        ..Default::default()
    }
}

pub fn redirect(location: &'static str) -> Reply {
    Reply {
        status: 302,
        location: Some(location),
        ..Default::default()
    }
}

/// Upstream that answers from a table and counts calls
#[derive(Default)]
pub struct FakeUpstream {
    replies: Mutex<HashMap<String, Reply>>,
    calls: AtomicUsize,
}

impl FakeUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, url: &str, reply: Reply) -> Self {
        self.replies.lock().insert(url.to_string(), reply);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Upstream for FakeUpstream {
    async fn get(&self, request: UpstreamRequest) -> Result<UpstreamResponse, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = self.replies.lock().get(request.url.as_str()).cloned();
        let Some(reply) = reply else {
            return Err(UpstreamError::Connect("no route to host".into()));
        };
        if let Some(delay) = reply.delay {
            tokio::time::sleep(delay).await;
        }
        let body = Bytes::from(reply.body);
        Ok(UpstreamResponse {
            status: reply.status,
            content_type: reply.content_type.map(str::to_string),
            content_length: reply.content_length,
            location: reply.location.map(str::to_string),
            body: futures_util::stream::iter(vec![Ok(body)]).boxed(),
        })
    }
}

/// Resolver with one public CDN, one internal host and a metadata alias
pub fn resolver() -> StaticResolver {
    let ip = |s: &str| s.parse::<IpAddr>().unwrap();
    StaticResolver::new()
        .with("cdn.example.com", &[ip(PUBLIC_IP)])
        .with("img.example.com", &[ip(PUBLIC_IP)])
        .with("internal.example.com", &[ip("10.0.0.5")])
        .with("loop.example.com", &[ip("127.0.0.1")])
        .with("meta.example.com", &[ip("169.254.169.254")])
        .with("lan.example.com", &[ip("192.168.1.1")])
        .with("mixed.example.com", &[ip(PUBLIC_IP), ip("10.1.2.3")])
}

pub fn policy() -> PolicyConfig {
    PolicyConfig::default()
        .with_media_hosts(&["*.example.com"])
        .with_iframe_hosts(&["www.youtube.com", "player.vimeo.com"])
}

/// Relay state over `upstream` and [`resolver`]
pub fn state(policy: PolicyConfig, upstream: Arc<FakeUpstream>) -> AppState {
    let policy = Arc::new(policy);
    let cache = Arc::new(ResponseCache::new(
        policy.cache_ttl(),
        policy.cache_max_entries,
    ));
    let pipeline = MediaFetchPipeline::new(
        policy,
        SsrfGuard::new(Arc::new(resolver())),
        cache,
        upstream,
    );
    AppState::new(Arc::new(pipeline))
}

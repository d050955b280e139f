//! Media fetch pipeline
//!
//! Validation and fetch for one relayed media URL. The stages run in a fixed
//! order and each one can end the request:
//!
//! 1. Parse: at most 2048 chars, scheme and host present (400)
//! 2. Allow-list: host on the media list (403)
//! 3. Scheme: exactly `https` (400)
//! 4. SSRF: every resolved address public (403; resolution failure 502,
//!    resolution past the deadline 504)
//! 5. Cache lookup: a fresh hit returns without touching the network
//! 6. Fetch: one deadline, started before stage 4, over all hops; redirects followed manually with
//!    stages 2-4 re-applied to each target (403), hop limit and broken
//!    redirects 502, timeout 504, non-2xx 502
//! 7. Content-type must classify as image/video/audio (415)
//! 8. Declared and streamed size must not exceed the limit (413)
//! 9. Cache store, then respond
//!
//! No DNS query happens before the allow-list and scheme checks pass, and no
//! cache mutation happens before every check passes.

use std::net::IpAddr;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use super::cache::{fingerprint, CachedMedia, ResponseCache};
use super::fetch::{outbound_headers, ReqwestUpstream, Upstream, UpstreamError, UpstreamRequest};
use crate::config::PolicyConfig;
use crate::error::RelayError;
use crate::security::mime::essence;
use crate::security::{HostAllowList, MimeClassifier, SsrfError, SsrfGuard};

/// Maximum accepted URL length in characters
pub const MAX_URL_LENGTH: usize = 2048;

/// Whether a response came from the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    /// Value of the `X-Cache` header
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
        }
    }
}

/// Relayed media ready to send to the client
#[derive(Debug, Clone)]
pub struct MediaResponse {
    pub bytes: Bytes,
    pub content_type: String,
    pub cache_status: CacheStatus,
    pub cache_control: String,
}

/// A URL that passed stages 1-4, with the addresses it may connect to
#[derive(Debug, Clone)]
pub struct CheckedTarget {
    pub url: Url,
    pub resolved: Vec<IpAddr>,
}

/// Validation and fetch pipeline for `/media`
pub struct MediaFetchPipeline {
    policy: Arc<PolicyConfig>,
    allow_list: HostAllowList,
    mime: MimeClassifier,
    guard: SsrfGuard,
    cache: Arc<ResponseCache>,
    upstream: Arc<dyn Upstream>,
}

impl MediaFetchPipeline {
    pub fn new(
        policy: Arc<PolicyConfig>,
        guard: SsrfGuard,
        cache: Arc<ResponseCache>,
        upstream: Arc<dyn Upstream>,
    ) -> Self {
        Self {
            allow_list: HostAllowList::new(&policy.media_hosts),
            mime: MimeClassifier::new(&policy.mime_types),
            policy,
            guard,
            cache,
            upstream,
        }
    }

    /// System DNS, reqwest transport and a cache sized from the policy
    pub fn with_defaults(policy: Arc<PolicyConfig>) -> Self {
        let cache = Arc::new(ResponseCache::new(
            policy.cache_ttl(),
            policy.cache_max_entries,
        ));
        let upstream = Arc::new(ReqwestUpstream::new(policy.timeout()));
        Self::new(policy, SsrfGuard::system(), cache, upstream)
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn policy(&self) -> &Arc<PolicyConfig> {
        &self.policy
    }

    pub fn allow_list(&self) -> &HostAllowList {
        &self.allow_list
    }

    pub fn mime(&self) -> &MimeClassifier {
        &self.mime
    }

    /// Run stages 1-4 on a raw URL without fetching. DNS is bounded by the
    /// policy timeout.
    pub async fn check(&self, raw: &str) -> Result<CheckedTarget, RelayError> {
        let deadline = Instant::now() + self.policy.timeout();
        self.check_until(raw, deadline).await
    }

    async fn check_until(&self, raw: &str, deadline: Instant) -> Result<CheckedTarget, RelayError> {
        tokio::time::timeout_at(deadline, self.check_raw(raw))
            .await
            .map_err(|_| {
                warn!(target: "media", timeout_ms = self.policy.timeout_ms, "validation timed out resolving host");
                RelayError::UpstreamTimeout(self.policy.timeout_ms)
            })?
    }

    async fn check_raw(&self, raw: &str) -> Result<CheckedTarget, RelayError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(RelayError::InvalidInput("missing url".to_string()));
        }
        if raw.chars().count() > MAX_URL_LENGTH {
            return Err(RelayError::InvalidInput(format!(
                "url exceeds {} characters",
                MAX_URL_LENGTH
            )));
        }

        let url = Url::parse(raw)
            .map_err(|e| RelayError::InvalidInput(format!("malformed url: {}", e)))?;
        if url.host_str().map_or(true, str::is_empty) {
            return Err(RelayError::InvalidInput("url has no host".to_string()));
        }

        self.check_parsed(url).await
    }

    /// Stages 2-4 for an already parsed URL
    async fn check_parsed(&self, url: Url) -> Result<CheckedTarget, RelayError> {
        let host = url.host_str().unwrap_or_default().to_string();

        if !self.allow_list.is_allowed(&host) {
            warn!(target: "media", host = %host, "host not on media allow-list");
            return Err(RelayError::PolicyViolation(format!(
                "host {} not allow-listed",
                host
            )));
        }

        if url.scheme() != "https" {
            return Err(RelayError::InvalidInput(format!(
                "only https is allowed, got '{}'",
                url.scheme()
            )));
        }

        let resolved = self.guard.resolve_public(&host).await.map_err(|e| match e {
            SsrfError::Blocked { .. } => {
                warn!(target: "media", host = %host, reason = %e, "SSRF check rejected target");
                RelayError::PolicyViolation(e.to_string())
            }
            SsrfError::Resolution { .. } => {
                warn!(target: "media", host = %host, error = %e, "DNS resolution failed");
                RelayError::Upstream(e.to_string())
            }
        })?;

        Ok(CheckedTarget { url, resolved })
    }

    /// A redirect target is held to the same rules; any rejection is a policy
    /// violation since the client did not choose the URL.
    async fn check_hop(&self, url: Url) -> Result<CheckedTarget, RelayError> {
        self.check_parsed(url).await.map_err(|e| match e {
            RelayError::InvalidInput(msg) => {
                warn!(target: "media", reason = %msg, "redirect target rejected");
                RelayError::PolicyViolation(format!("redirect target rejected: {}", msg))
            }
            other => other,
        })
    }

    /// Validate, then serve from cache or fetch. One deadline covers the
    /// first DNS lookup and every hop after it.
    pub async fn fetch(&self, raw: &str) -> Result<MediaResponse, RelayError> {
        let started = Instant::now();
        let deadline = started + self.policy.timeout();
        let target = self.check_until(raw, deadline).await?;
        let key = fingerprint(&target.url);

        if let Some(hit) = self.cache.get(&key) {
            debug!(target: "media", url = %target.url, "cache hit");
            return Ok(MediaResponse {
                bytes: hit.bytes,
                content_type: hit.content_type,
                cache_status: CacheStatus::Hit,
                cache_control: self.policy.cache_control(),
            });
        }

        let (bytes, content_type) =
            tokio::time::timeout_at(deadline, self.fetch_upstream(target.clone()))
                .await
                .map_err(|_| {
                    warn!(target: "media", url = %target.url, timeout_ms = self.policy.timeout_ms, "upstream timed out");
                    RelayError::UpstreamTimeout(self.policy.timeout_ms)
                })??;

        info!(
            target: "media",
            host = target.url.host_str().unwrap_or_default(),
            content_type = %content_type,
            size = bytes.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "relayed media"
        );

        self.cache.put(
            key,
            CachedMedia {
                bytes: bytes.clone(),
                content_type: content_type.clone(),
            },
        );

        Ok(MediaResponse {
            bytes,
            content_type,
            cache_status: CacheStatus::Miss,
            cache_control: self.policy.cache_control(),
        })
    }

    /// Stages 6-8
    async fn fetch_upstream(&self, target: CheckedTarget) -> Result<(Bytes, String), RelayError> {
        let mut current = target;
        let mut redirects = 0usize;

        loop {
            let request = UpstreamRequest {
                headers: outbound_headers(&current.url, &self.policy.user_agent),
                url: current.url.clone(),
                resolved: current.resolved.clone(),
            };
            let response = self
                .upstream
                .get(request)
                .await
                .map_err(|e| self.map_upstream_error(e))?;

            if response.is_redirect() {
                if redirects >= self.policy.max_redirects {
                    return Err(RelayError::Upstream(format!(
                        "more than {} redirects",
                        self.policy.max_redirects
                    )));
                }
                redirects += 1;

                let location = response.location.ok_or_else(|| {
                    RelayError::Upstream("redirect without Location header".to_string())
                })?;
                let next = current
                    .url
                    .join(&location)
                    .map_err(|_| RelayError::Upstream("unusable redirect location".to_string()))?;

                debug!(target: "media", from = %current.url, to = %next, hop = redirects, "following redirect");
                current = self.check_hop(next).await?;
                continue;
            }

            if !response.is_success() {
                return Err(RelayError::Upstream(format!(
                    "upstream returned status {}",
                    response.status
                )));
            }

            let content_type = response.content_type.clone().unwrap_or_default();
            if !self.mime.is_allowed(&content_type) {
                let shown = essence(&content_type);
                warn!(target: "media", url = %current.url, content_type = %shown, "unsupported content type");
                return Err(RelayError::UnsupportedMediaType(if shown.is_empty() {
                    "missing content-type".to_string()
                } else {
                    shown
                }));
            }

            let max = self.policy.max_bytes;
            if let Some(declared) = response.content_length {
                if declared > max {
                    return Err(RelayError::PayloadTooLarge {
                        size: declared,
                        max,
                    });
                }
            }

            let mut body = BytesMut::new();
            let mut stream = response.body;
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| self.map_upstream_error(e))?;
                let size = body.len() as u64 + chunk.len() as u64;
                if size > max {
                    return Err(RelayError::PayloadTooLarge { size, max });
                }
                body.extend_from_slice(&chunk);
            }

            return Ok((body.freeze(), content_type));
        }
    }

    fn map_upstream_error(&self, e: UpstreamError) -> RelayError {
        match e {
            UpstreamError::Timeout => RelayError::UpstreamTimeout(self.policy.timeout_ms),
            other => RelayError::Upstream(other.to_string()),
        }
    }
}

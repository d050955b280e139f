//! Media relay
//!
//! - **MediaFetchPipeline**: validation and fetch for one media URL
//!   - Host allow-list, https-only, SSRF check before any outbound request
//!   - Redirects followed manually, every hop re-validated
//!   - Content-type and size limits enforced while streaming
//!
//! - **ResponseCache**: bounded in-memory cache with TTL expiry
//!   - Oldest-created eviction at capacity
//!   - Background sweep task
//!
//! - **Upstream**: outbound transport seam (reqwest with IP pinning by default)
//!
//! # Example
//!
//! ```ignore
//! use media_relay::media::MediaFetchPipeline;
//!
//! let pipeline = MediaFetchPipeline::with_defaults(policy);
//! let media = pipeline.fetch("https://i.imgur.com/abc.png").await?;
//! println!("{} bytes of {} ({})", media.bytes.len(), media.content_type, media.cache_status.as_str());
//! ```

pub mod cache;
pub mod fetch;
pub mod pipeline;

pub use cache::{fingerprint, CacheStats, CachedMedia, Clock, ManualClock, ResponseCache, SystemClock};
pub use fetch::{
    outbound_headers, ReqwestUpstream, Upstream, UpstreamError, UpstreamRequest, UpstreamResponse,
};
pub use pipeline::{CacheStatus, CheckedTarget, MediaFetchPipeline, MediaResponse, MAX_URL_LENGTH};

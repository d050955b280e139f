//! Relay policy
//!
//! [`PolicyConfig`] is built once at startup from the `policy` section of the
//! config file and shared read-only (behind an `Arc`) by the media pipeline,
//! the response cache and the iframe sanitizer. Nothing mutates it after
//! construction; tests build their own instances with the `with_*` helpers.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::defaults;
use super::ConfigError;

/// Allowed MIME strings per media class
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MimeTable {
    pub images: Vec<String>,
    pub videos: Vec<String>,
    pub audios: Vec<String>,
}

impl Default for MimeTable {
    fn default() -> Self {
        Self {
            images: to_strings(defaults::DEFAULT_IMAGE_MIME_TYPES),
            videos: to_strings(defaults::DEFAULT_VIDEO_MIME_TYPES),
            audios: to_strings(defaults::DEFAULT_AUDIO_MIME_TYPES),
        }
    }
}

impl MimeTable {
    /// Total number of MIME strings across all classes
    pub fn len(&self) -> usize {
        self.images.len() + self.videos.len() + self.audios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-wide relay policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PolicyConfig {
    /// Hosts the media relay may fetch from (`*.` prefix for wildcard)
    pub media_hosts: Vec<String>,

    /// Hosts an iframe may point at
    pub iframe_hosts: Vec<String>,

    /// Allowed upstream content types
    pub mime_types: MimeTable,

    /// Maximum upstream body size in bytes
    pub max_bytes: u64,

    /// Cache time-to-live in seconds (also the client max-age)
    pub cache_ttl_secs: u64,

    /// Maximum number of cached responses
    pub cache_max_entries: usize,

    /// Interval between background sweeps of expired entries
    pub cache_sweep_interval_secs: u64,

    /// Outbound timeout in milliseconds, covering every redirect hop
    pub timeout_ms: u64,

    /// Maximum redirects followed for one request
    pub max_redirects: usize,

    /// User-Agent sent upstream
    pub user_agent: String,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            media_hosts: to_strings(defaults::DEFAULT_MEDIA_HOSTS),
            iframe_hosts: to_strings(defaults::DEFAULT_IFRAME_HOSTS),
            mime_types: MimeTable::default(),
            max_bytes: defaults::DEFAULT_MAX_BYTES,
            cache_ttl_secs: defaults::DEFAULT_CACHE_TTL_SECS,
            cache_max_entries: defaults::DEFAULT_CACHE_MAX_ENTRIES,
            cache_sweep_interval_secs: defaults::DEFAULT_CACHE_SWEEP_INTERVAL_SECS,
            timeout_ms: defaults::DEFAULT_TIMEOUT_MS,
            max_redirects: defaults::DEFAULT_MAX_REDIRECTS,
            user_agent: defaults::DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl PolicyConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.cache_sweep_interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// `Cache-Control` value returned with relayed media
    pub fn cache_control(&self) -> String {
        format!("public, max-age={}", self.cache_ttl_secs)
    }

    /// Replace the media allow-list
    pub fn with_media_hosts(mut self, hosts: &[&str]) -> Self {
        self.media_hosts = to_strings(hosts);
        self
    }

    /// Replace the iframe allow-list
    pub fn with_iframe_hosts(mut self, hosts: &[&str]) -> Self {
        self.iframe_hosts = to_strings(hosts);
        self
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn with_cache_ttl_secs(mut self, secs: u64) -> Self {
        self.cache_ttl_secs = secs;
        self
    }

    pub fn with_cache_max_entries(mut self, max_entries: usize) -> Self {
        self.cache_max_entries = max_entries;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_max_redirects(mut self, max_redirects: usize) -> Self {
        self.max_redirects = max_redirects;
        self
    }

    /// Reject values that would make the relay unusable or unbounded.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |path: &str, message: &str| ConfigError::ValidationError {
            path: path.to_string(),
            message: message.to_string(),
        };

        if self.max_bytes == 0 {
            return Err(invalid(".policy.maxBytes", "must be greater than zero"));
        }
        if self.cache_max_entries == 0 {
            return Err(invalid(
                ".policy.cacheMaxEntries",
                "must be greater than zero",
            ));
        }
        if self.cache_sweep_interval_secs == 0 {
            return Err(invalid(
                ".policy.cacheSweepIntervalSecs",
                "must be greater than zero",
            ));
        }
        if self.timeout_ms == 0 || self.timeout_ms > defaults::MAX_TIMEOUT_MS {
            return Err(invalid(
                ".policy.timeoutMs",
                &format!("must be between 1 and {}", defaults::MAX_TIMEOUT_MS),
            ));
        }
        if self.mime_types.is_empty() {
            return Err(invalid(
                ".policy.mimeTypes",
                "at least one MIME type is required",
            ));
        }
        if self.user_agent.trim().is_empty() {
            return Err(invalid(".policy.userAgent", "must not be empty"));
        }
        Ok(())
    }
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

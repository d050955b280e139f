//! Host allow-list matching
//!
//! An entry `example.com` matches `example.com` and every subdomain of it.
//! An entry `*.example.com` is accepted as an explicit wildcard and matches
//! the same set. Matching is suffix-on-label-boundary, so `evilexample.com`
//! never matches `example.com`.

use url::Url;

/// Normalized set of allowed hosts
#[derive(Debug, Clone, Default)]
pub struct HostAllowList {
    /// Base domains, lower-cased, wildcard prefix removed
    bases: Vec<String>,
}

impl HostAllowList {
    /// Build from configured entries. Entries are trimmed and lower-cased;
    /// empty entries are dropped.
    pub fn new<S: AsRef<str>>(entries: &[S]) -> Self {
        let bases = entries
            .iter()
            .filter_map(|entry| normalize_entry(entry.as_ref()))
            .collect();
        Self { bases }
    }

    /// Whether `host` is covered by any entry. Empty hosts never match.
    pub fn is_allowed(&self, host: &str) -> bool {
        let host = normalize_host(host);
        if host.is_empty() {
            return false;
        }
        self.bases.iter().any(|base| host_matches(&host, base))
    }

    /// Parse `raw` and check its host. Unparsable input yields `false`.
    pub fn is_url_allowed(&self, raw: &str) -> bool {
        match Url::parse(raw) {
            Ok(url) => url.host_str().is_some_and(|host| self.is_allowed(host)),
            Err(_) => false,
        }
    }

    /// Number of usable entries
    pub fn len(&self) -> usize {
        self.bases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bases.is_empty()
    }
}

/// One-shot check without building a [`HostAllowList`].
pub fn is_host_allowed<S: AsRef<str>>(host: &str, entries: &[S]) -> bool {
    let host = normalize_host(host);
    if host.is_empty() {
        return false;
    }
    entries
        .iter()
        .filter_map(|entry| normalize_entry(entry.as_ref()))
        .any(|base| host_matches(&host, &base))
}

fn normalize_entry(entry: &str) -> Option<String> {
    let entry = entry.trim().to_ascii_lowercase();
    let base = entry.strip_prefix("*.").unwrap_or(&entry);
    let base = base.trim_end_matches('.');
    if base.is_empty() {
        None
    } else {
        Some(base.to_string())
    }
}

fn normalize_host(host: &str) -> String {
    host.trim().trim_end_matches('.').to_ascii_lowercase()
}

fn host_matches(host: &str, base: &str) -> bool {
    if host == base {
        return true;
    }
    host.len() > base.len()
        && host.ends_with(base)
        && host.as_bytes()[host.len() - base.len() - 1] == b'.'
}

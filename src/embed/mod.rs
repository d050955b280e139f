//! Iframe embed sanitizer
//!
//! Turns an untrusted embed URL (or a pasted `<iframe>` snippet) into a
//! descriptor with a sanitized `src` and a fixed, restrictive attribute set.
//!
//! The sanitized URL is rebuilt from parsed components rather than edited in
//! place: scheme forced to https, userinfo and fragment dropped, query
//! parameters filtered against a deny-set and re-encoded in their original
//! order. The result is parsed again and must still pass the allow-list.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, error, warn};
use url::{form_urlencoded, Url};

use crate::config::PolicyConfig;
use crate::error::RelayError;
use crate::media::MAX_URL_LENGTH;
use crate::security::{is_host_allowed, HostAllowList};

/// Query parameter names removed from embed URLs (compared case-insensitively)
pub const DENIED_QUERY_PARAMS: &[&str] = &[
    "javascript",
    "data",
    "vbscript",
    "onclick",
    "onerror",
    "onload",
    "onmouseover",
    "onfocus",
    "onblur",
    "eval",
    "script",
];

pub const SANDBOX: &str = "allow-scripts allow-same-origin allow-presentation";
pub const ALLOW: &str = "autoplay; clipboard-write; encrypted-media; fullscreen; picture-in-picture";
pub const REFERRER_POLICY: &str = "no-referrer";
pub const LOADING: &str = "lazy";

const IFRAME_STYLE: &str = "width: 100%; height: 100%; border: none; border-radius: 12px;";

static SRC_ATTR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)\bsrc\s*=\s*["']([^"']+)["']"#).unwrap());

static YOUTUBE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{11}$").unwrap());

/// Embed source platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Youtube,
    Vimeo,
    Spotify,
    Soundcloud,
    Twitch,
    Instagram,
    Twitter,
    Tiktok,
    Dailymotion,
    Generic,
}

impl Platform {
    const DOMAINS: &'static [(Platform, &'static [&'static str])] = &[
        (
            Platform::Youtube,
            &["youtube.com", "youtu.be", "youtube-nocookie.com"],
        ),
        (Platform::Vimeo, &["vimeo.com"]),
        (Platform::Spotify, &["spotify.com"]),
        (Platform::Soundcloud, &["soundcloud.com"]),
        (Platform::Twitch, &["twitch.tv"]),
        (Platform::Instagram, &["instagram.com"]),
        (Platform::Twitter, &["twitter.com", "x.com"]),
        (Platform::Tiktok, &["tiktok.com"]),
        (Platform::Dailymotion, &["dailymotion.com"]),
    ];

    /// Classify by host. Matching is on label boundaries, so `box.com` is
    /// not Twitter.
    pub fn detect(host: &str) -> Platform {
        Self::DOMAINS
            .iter()
            .find(|(_, domains)| is_host_allowed(host, domains))
            .map(|(platform, _)| *platform)
            .unwrap_or(Platform::Generic)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Youtube => "youtube",
            Platform::Vimeo => "vimeo",
            Platform::Spotify => "spotify",
            Platform::Soundcloud => "soundcloud",
            Platform::Twitch => "twitch",
            Platform::Instagram => "instagram",
            Platform::Twitter => "twitter",
            Platform::Tiktok => "tiktok",
            Platform::Dailymotion => "dailymotion",
            Platform::Generic => "generic",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attributes applied to every generated iframe
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IframeAttributes {
    pub src: String,
    pub sandbox: String,
    pub allow: String,
    pub referrerpolicy: String,
    pub loading: String,
}

impl IframeAttributes {
    fn for_src(src: &str) -> Self {
        Self {
            src: src.to_string(),
            sandbox: SANDBOX.to_string(),
            allow: ALLOW.to_string(),
            referrerpolicy: REFERRER_POLICY.to_string(),
            loading: LOADING.to_string(),
        }
    }

    /// `<iframe>` markup with every attribute value escaped
    pub fn to_html(&self) -> String {
        format!(
            r#"<iframe src="{}" sandbox="{}" allow="{}" referrerpolicy="{}" loading="{}" style="{}"></iframe>"#,
            escape_attr(&self.src),
            escape_attr(&self.sandbox),
            escape_attr(&self.allow),
            escape_attr(&self.referrerpolicy),
            escape_attr(&self.loading),
            IFRAME_STYLE,
        )
    }
}

/// Result of a successful validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbedDescriptor {
    pub original_url: String,
    pub sanitized_url: String,
    pub platform: Platform,
    pub attributes: IframeAttributes,
    pub embed_html: String,
}

/// Validates iframe targets against the iframe allow-list
#[derive(Debug, Clone)]
pub struct IframeSanitizer {
    allow_list: HostAllowList,
}

impl IframeSanitizer {
    pub fn new(policy: &PolicyConfig) -> Self {
        Self {
            allow_list: HostAllowList::new(&policy.iframe_hosts),
        }
    }

    pub fn allow_list(&self) -> &HostAllowList {
        &self.allow_list
    }

    /// Validate and sanitize one embed URL.
    pub fn validate(&self, raw: &str) -> Result<EmbedDescriptor, RelayError> {
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
        let host = match url.host_str() {
            Some(h) if !h.is_empty() => h.to_string(),
            _ => return Err(RelayError::InvalidInput("url has no host".to_string())),
        };
        if !matches!(url.scheme(), "http" | "https") {
            return Err(RelayError::InvalidInput(format!(
                "scheme '{}' not allowed for embeds",
                url.scheme()
            )));
        }

        if !self.allow_list.is_allowed(&host) {
            warn!(target: "embed", host = %host, "iframe host not allow-listed");
            return Err(RelayError::PolicyViolation(format!(
                "iframe host {} not allow-listed",
                host
            )));
        }

        let sanitized = self.sanitize(&url).map_err(|reason| {
            error!(target: "embed", url = %raw, reason = %reason, "sanitized url failed re-validation");
            RelayError::Internal(reason)
        })?;

        let platform = Platform::detect(&host);
        let attributes = IframeAttributes::for_src(sanitized.as_str());
        let embed_html = attributes.to_html();

        debug!(target: "embed", host = %host, platform = %platform, "iframe validated");

        Ok(EmbedDescriptor {
            original_url: raw.to_string(),
            sanitized_url: sanitized.to_string(),
            platform,
            attributes,
            embed_html,
        })
    }

    /// Convert a share link to its embed form, then validate. The descriptor
    /// reports the URL the caller supplied.
    pub fn validate_share_url(&self, raw: &str) -> Result<EmbedDescriptor, RelayError> {
        match to_embed_url(raw) {
            Some(converted) => {
                debug!(target: "embed", from = %raw.trim(), to = %converted, "converted share url");
                let mut descriptor = self.validate(&converted)?;
                descriptor.original_url = raw.trim().to_string();
                Ok(descriptor)
            }
            None => self.validate(raw),
        }
    }

    /// Validate a pasted `<iframe>` snippet. The returned markup replaces the
    /// snippet entirely; none of its other attributes survive.
    pub fn validate_embed_code(&self, html: &str) -> Result<EmbedDescriptor, RelayError> {
        if html.trim().is_empty() {
            return Err(RelayError::InvalidInput("missing embed code".to_string()));
        }
        if !html.to_ascii_lowercase().contains("<iframe") {
            return Err(RelayError::InvalidInput(
                "embed code is not an iframe".to_string(),
            ));
        }
        let src = SRC_ATTR
            .captures(html)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().replace("&amp;", "&"))
            .ok_or_else(|| RelayError::InvalidInput("iframe has no src attribute".to_string()))?;

        self.validate(&src)
    }

    /// Rebuild `url` from components and re-check the result.
    fn sanitize(&self, url: &Url) -> Result<Url, String> {
        let host = url.host_str().unwrap_or_default();
        let authority = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };

        let mut rebuilt = Url::parse(&format!("https://{}{}", authority, url.path()))
            .map_err(|e| format!("rebuild failed: {}", e))?;

        // Surviving pairs are copied byte for byte: flags stay bare and
        // existing percent-escapes are not re-encoded.
        let kept: Vec<&str> = url
            .query()
            .unwrap_or_default()
            .split('&')
            .filter(|pair| !pair.is_empty() && !is_denied_pair(pair))
            .collect();
        let query = kept.join("&");
        rebuilt.set_query((!query.is_empty()).then_some(query.as_str()));

        let reparsed =
            Url::parse(rebuilt.as_str()).map_err(|e| format!("re-parse failed: {}", e))?;
        if reparsed.scheme() != "https" {
            return Err("sanitized url is not https".to_string());
        }
        let still_allowed = reparsed
            .host_str()
            .is_some_and(|h| self.allow_list.is_allowed(h));
        if !still_allowed {
            return Err("sanitized url left the allow-list".to_string());
        }
        Ok(reparsed)
    }
}

/// Judge a raw `key=value` pair by its decoded key.
fn is_denied_pair(pair: &str) -> bool {
    form_urlencoded::parse(pair.as_bytes())
        .next()
        .is_some_and(|(key, _)| is_denied_param(&key))
}

fn is_denied_param(key: &str) -> bool {
    DENIED_QUERY_PARAMS
        .iter()
        .any(|denied| key.eq_ignore_ascii_case(denied))
}

fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

/// Embed form of a well-known share link, or `None` if `raw` is not one
/// (including links already in embed form).
pub fn to_embed_url(raw: &str) -> Option<String> {
    let url = Url::parse(raw.trim()).ok()?;
    let host = url.host_str()?.to_ascii_lowercase();
    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();

    if is_host_allowed(&host, &["youtube.com", "youtu.be"]) {
        let id = if host == "youtu.be" || host.ends_with(".youtu.be") {
            segments.first().map(|s| s.to_string())
        } else {
            match segments.as_slice() {
                ["watch"] => url
                    .query_pairs()
                    .find(|(k, _)| k == "v")
                    .map(|(_, v)| v.into_owned()),
                ["shorts", id] | ["v", id] | ["live", id] => Some(id.to_string()),
                _ => None,
            }
        };
        return id
            .filter(|id| YOUTUBE_ID.is_match(id))
            .map(|id| format!("https://www.youtube.com/embed/{}", id));
    }

    if host == "vimeo.com" || host == "www.vimeo.com" {
        let id = segments.last()?;
        if id.chars().all(|c| c.is_ascii_digit()) {
            return Some(format!("https://player.vimeo.com/video/{}", id));
        }
        return None;
    }

    if host == "open.spotify.com" {
        return match segments.as_slice() {
            [kind, id] if *kind != "embed" => {
                Some(format!("https://open.spotify.com/embed/{}/{}", kind, id))
            }
            _ => None,
        };
    }

    if is_host_allowed(&host, &["soundcloud.com"]) && host != "w.soundcloud.com" {
        let encoded: String = form_urlencoded::byte_serialize(raw.trim().as_bytes()).collect();
        return Some(format!("https://w.soundcloud.com/player/?url={}", encoded));
    }

    None
}

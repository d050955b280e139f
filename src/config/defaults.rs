//! Config defaults application
//!
//! Fills in missing sections/fields of a parsed config so that partial configs
//! work. Typed structs with `#[serde(default)]` supply the values, the result
//! is serialized back to `Value` and merged *under* the user's values.
//!
//! The default policy tables are the ones the relay has always shipped with:
//! common image/video CDNs for media, well-known embed players for iframes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::policy::PolicyConfig;

/// Default listen port
pub const DEFAULT_PORT: u16 = 8787;

/// Default bind address (loopback only)
pub const DEFAULT_BIND: &str = "127.0.0.1";

/// Default maximum body size (10 MiB)
pub const DEFAULT_MAX_BYTES: u64 = 10 * 1024 * 1024;

/// Default cache TTL (7 days)
pub const DEFAULT_CACHE_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Default cache capacity
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 100;

/// Default sweep interval (1 hour)
pub const DEFAULT_CACHE_SWEEP_INTERVAL_SECS: u64 = 60 * 60;

/// Default outbound timeout (8s)
pub const DEFAULT_TIMEOUT_MS: u64 = 8_000;

/// Upper bound accepted for the outbound timeout (5 minutes)
pub const MAX_TIMEOUT_MS: u64 = 300_000;

/// Default redirect hop limit
pub const DEFAULT_MAX_REDIRECTS: usize = 5;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (compatible; MediaRelay/1.0)";

pub const DEFAULT_IMAGE_MIME_TYPES: &[&str] = &[
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/gif",
    "image/webp",
    "image/svg+xml",
    "image/bmp",
    "image/tiff",
];

pub const DEFAULT_VIDEO_MIME_TYPES: &[&str] =
    &["video/mp4", "video/webm", "video/ogg", "video/quicktime"];

pub const DEFAULT_AUDIO_MIME_TYPES: &[&str] = &[
    "audio/mpeg",
    "audio/mp3",
    "audio/ogg",
    "audio/wav",
    "audio/webm",
];

pub const DEFAULT_MEDIA_HOSTS: &[&str] = &[
    // Image hosts
    "imgur.com",
    "i.imgur.com",
    "*.imgur.com",
    "staticflickr.com",
    "upload.wikimedia.org",
    "*.wikimedia.org",
    "*.wikipedia.org",
    "images.unsplash.com",
    "cdn.pixabay.com",
    "picsum.photos",
    "*.giphy.com",
    "*.tenor.com",
    "gravatar.com",
    "githubusercontent.com",
    "ui-avatars.com",
    "placehold.co",
    "via.placeholder.com",
    "dummyimage.com",
    // General CDNs
    "cloudinary.com",
    "cloudfront.net",
    "akamaized.net",
    "fastly.net",
    // Social
    "*.twimg.com",
    "*.cdninstagram.com",
    "*.fbcdn.net",
    "*.redd.it",
    // Video
    "*.ytimg.com",
    "img.youtube.com",
    "*.vimeocdn.com",
    "*.dmcdn.net",
    "*.jtvnw.net",
    "*.ttvnw.net",
    "*.tiktokcdn.com",
    "*.tiktokcdn-us.com",
    "*.tiktokcdn-eu.com",
    // Audio
    "*.scdn.co",
    "*.spotifycdn.com",
    "*.sndcdn.com",
    "*.dzcdn.net",
    "*.mzstatic.com",
    "*.bcbits.com",
    // Chat
    "*.discordapp.com",
    "*.discordapp.net",
];

pub const DEFAULT_IFRAME_HOSTS: &[&str] = &[
    // Video
    "www.youtube.com",
    "youtube.com",
    "youtube-nocookie.com",
    "player.vimeo.com",
    "vimeo.com",
    "player.twitch.tv",
    "clips.twitch.tv",
    "twitch.tv",
    "dailymotion.com",
    // Audio
    "open.spotify.com",
    "embed.spotify.com",
    "w.soundcloud.com",
    "soundcloud.com",
    "bandcamp.com",
    "megaphone.fm",
    "omny.fm",
    "embed.music.apple.com",
    "embed.podcasts.apple.com",
    // Social
    "www.instagram.com",
    "platform.twitter.com",
    "www.tiktok.com",
    "embed.reddit.com",
    // Documents, maps and code
    "docs.google.com",
    "maps.google.com",
    "www.openstreetmap.org",
    "speakerdeck.com",
    "codepen.io",
    "codesandbox.io",
    "stackblitz.com",
    "gist.github.com",
    // Other
    "embed.ted.com",
    "www.figma.com",
    "www.loom.com",
    "giphy.com",
];

/// Top-level config sections that receive defaults.
///
/// Sections not listed here pass through unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigWithDefaults {
    #[serde(default)]
    server: ServerDefaults,

    #[serde(default)]
    policy: PolicyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerDefaults {
    #[serde(default = "default_bind")]
    bind: String,

    #[serde(default = "default_port")]
    port: u16,
}

impl Default for ServerDefaults {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

/// Fill in missing `server` and `policy` fields. User values always win.
pub fn apply_defaults(config: &mut Value) {
    if !config.is_object() {
        *config = Value::Object(serde_json::Map::new());
    }

    let with_defaults: ConfigWithDefaults = match serde_json::from_value(config.clone()) {
        Ok(v) => v,
        Err(e) => {
            debug!(target: "config", "defaults: deserialization failed, using all defaults: {e}");
            ConfigWithDefaults::default()
        }
    };

    let defaults_value = serde_json::to_value(&with_defaults).unwrap_or_default();
    merge_defaults(config, defaults_value);
}

/// Deep-merge `defaults` into `target`.
///
/// - For objects: recursively merge; keys in `target` are preserved.
/// - For all other types: `target` keeps its value if present.
fn merge_defaults(target: &mut Value, defaults: Value) {
    if let (Value::Object(target_obj), Value::Object(defaults_obj)) = (target, defaults) {
        for (key, default_value) in defaults_obj {
            match target_obj.get_mut(&key) {
                Some(existing) => merge_defaults(existing, default_value),
                None => {
                    target_obj.insert(key, default_value);
                }
            }
        }
    }
}

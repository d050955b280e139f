//! Response hardening headers
//!
//! Every response gets:
//! - X-Content-Type-Options: nosniff
//! - X-Frame-Options: SAMEORIGIN
//! - Referrer-Policy: no-referrer
//!
//! Media responses additionally allow any origin so pages can embed
//! relayed images and video.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, HeaderValue, Request, Response},
    middleware::Next,
};

/// Header values applied by [`security_headers_middleware`]
#[derive(Debug, Clone)]
pub struct SecurityHeadersConfig {
    pub content_type_options: String,
    pub frame_options: String,
    pub referrer_policy: String,
    /// `Access-Control-Allow-Origin` for paths under `cors_path_prefix`
    pub media_allow_origin: Option<String>,
    pub cors_path_prefix: String,
}

impl Default for SecurityHeadersConfig {
    fn default() -> Self {
        Self {
            content_type_options: "nosniff".to_string(),
            frame_options: "SAMEORIGIN".to_string(),
            referrer_policy: "no-referrer".to_string(),
            media_allow_origin: Some("*".to_string()),
            cors_path_prefix: "/media".to_string(),
        }
    }
}

impl SecurityHeadersConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_frame_options(mut self, value: impl Into<String>) -> Self {
        self.frame_options = value.into();
        self
    }

    pub fn with_referrer_policy(mut self, value: impl Into<String>) -> Self {
        self.referrer_policy = value.into();
        self
    }

    /// Disable the media CORS header
    pub fn without_media_cors(mut self) -> Self {
        self.media_allow_origin = None;
        self
    }

    fn applies_cors(&self, path: &str) -> bool {
        path == self.cors_path_prefix
            || path
                .strip_prefix(self.cors_path_prefix.as_str())
                .is_some_and(|rest| rest.starts_with('/'))
    }
}

/// Security headers middleware.
///
/// Use with `axum::middleware::from_fn_with_state`. Values that fail to
/// parse as header values are skipped.
pub async fn security_headers_middleware(
    config: axum::extract::State<Arc<SecurityHeadersConfig>>,
    request: Request<Body>,
    next: Next,
) -> Response<Body> {
    let cors = config.applies_cors(request.uri().path());

    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    if let Ok(value) = HeaderValue::from_str(&config.content_type_options) {
        headers.insert(header::X_CONTENT_TYPE_OPTIONS, value);
    }
    if let Ok(value) = HeaderValue::from_str(&config.frame_options) {
        headers.insert(header::X_FRAME_OPTIONS, value);
    }
    if let Ok(value) = HeaderValue::from_str(&config.referrer_policy) {
        headers.insert(header::REFERRER_POLICY, value);
    }

    if cors {
        if let Some(ref origin) = config.media_allow_origin {
            if let Ok(value) = HeaderValue::from_str(origin) {
                headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
            }
        }
    }

    response
}

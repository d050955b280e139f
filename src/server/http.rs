//! HTTP server implementation
//!
//! Implements:
//! - Media relay (GET /media?url=)
//! - Iframe validation (POST /iframe, GET /iframe?url=)
//! - Health (GET /health, /health/live) and cache statistics (GET /stats)
//! - Response hardening middleware

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Query, State},
    http::{header, HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::PolicyConfig;
use crate::embed::{EmbedDescriptor, IframeSanitizer};
use crate::error::RelayError;
use crate::logging::targets;
use crate::media::MediaFetchPipeline;
use crate::security::MediaClass;
use crate::server::headers::{security_headers_middleware, SecurityHeadersConfig};

/// Max body size for POST /iframe (64KB)
pub const DEFAULT_MAX_BODY_BYTES: usize = 65536;

/// Shared state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<MediaFetchPipeline>,
    pub sanitizer: Arc<IframeSanitizer>,
    pub policy: Arc<PolicyConfig>,
    /// Server start time (Unix timestamp)
    pub start_time: i64,
}

impl AppState {
    /// State over an existing pipeline. The handlers and the sanitizer read
    /// the pipeline's own policy instance.
    pub fn new(pipeline: Arc<MediaFetchPipeline>) -> Self {
        let policy = Arc::clone(pipeline.policy());
        Self {
            sanitizer: Arc::new(IframeSanitizer::new(&policy)),
            pipeline,
            policy,
            start_time: chrono::Utc::now().timestamp(),
        }
    }

    /// Production state: system DNS and reqwest transport
    pub fn from_policy(policy: Arc<PolicyConfig>) -> Self {
        Self::new(Arc::new(MediaFetchPipeline::with_defaults(policy)))
    }
}

/// Middleware configuration for the HTTP server
#[derive(Debug, Clone)]
pub struct MiddlewareConfig {
    pub security_headers: SecurityHeadersConfig,
    pub enable_security_headers: bool,
}

impl Default for MiddlewareConfig {
    fn default() -> Self {
        MiddlewareConfig {
            security_headers: SecurityHeadersConfig::default(),
            enable_security_headers: true,
        }
    }
}

impl MiddlewareConfig {
    /// All middleware disabled
    pub fn none() -> Self {
        MiddlewareConfig {
            security_headers: SecurityHeadersConfig::default(),
            enable_security_headers: false,
        }
    }
}

/// Create the HTTP router with default middleware
pub fn create_router(state: AppState) -> Router {
    create_router_with_middleware(state, MiddlewareConfig::default())
}

/// Create the HTTP router with explicit middleware settings
pub fn create_router_with_middleware(state: AppState, middleware_config: MiddlewareConfig) -> Router {
    let mut router = Router::new()
        .route("/media", get(media_handler))
        .route("/iframe", get(iframe_get_handler).post(iframe_post_handler))
        .route("/health", get(health_handler))
        .route("/health/live", get(health_handler))
        .route("/stats", get(stats_handler))
        .fallback(not_found_handler)
        .layer(DefaultBodyLimit::max(DEFAULT_MAX_BODY_BYTES))
        .with_state(state);

    if middleware_config.enable_security_headers {
        let headers_config = Arc::new(middleware_config.security_headers);
        router = router.layer(middleware::from_fn_with_state(
            headers_config,
            security_headers_middleware,
        ));
    }

    router
}

// ============================================================================
// Errors
// ============================================================================

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match &self {
            RelayError::Internal(_) => {
                error!(target: targets::HTTP, code = self.code(), error = %self, "request failed")
            }
            e if e.is_upstream() => {
                warn!(target: targets::HTTP, code = self.code(), error = %self, "upstream failure")
            }
            _ => debug!(target: targets::HTTP, code = self.code(), error = %self, "request rejected"),
        }
        (
            status,
            Json(json!({
                "ok": false,
                "error": self.public_message(),
                "code": self.code(),
            })),
        )
            .into_response()
    }
}

// ============================================================================
// Media
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct MediaQuery {
    pub url: Option<String>,
}

/// GET /media?url= - Relay one allow-listed media resource.
async fn media_handler(State(state): State<AppState>, Query(query): Query<MediaQuery>) -> Response {
    let Some(url) = query.url else {
        return RelayError::InvalidInput("missing url parameter".to_string()).into_response();
    };

    match state.pipeline.fetch(&url).await {
        Ok(media) => {
            let mut response = (StatusCode::OK, media.bytes).into_response();
            let headers = response.headers_mut();
            if let Ok(value) = HeaderValue::from_str(&media.content_type) {
                headers.insert(header::CONTENT_TYPE, value);
            }
            if let Ok(value) = HeaderValue::from_str(&media.cache_control) {
                headers.insert(header::CACHE_CONTROL, value);
            }
            headers.insert("x-cache", HeaderValue::from_static(media.cache_status.as_str()));
            headers.insert(
                header::X_CONTENT_TYPE_OPTIONS,
                HeaderValue::from_static("nosniff"),
            );
            response
        }
        Err(e) => e.into_response(),
    }
}

// ============================================================================
// Iframe
// ============================================================================

/// Body of POST /iframe
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IframeRequest {
    pub url: Option<String>,
    pub embed_code: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct IframeQuery {
    pub url: Option<String>,
}

fn descriptor_response(descriptor: EmbedDescriptor) -> Response {
    let mut data = serde_json::to_value(&descriptor).unwrap_or_else(|_| json!({}));
    if let Value::Object(ref mut map) = data {
        map.insert("isValid".to_string(), Value::Bool(true));
    }
    (StatusCode::OK, Json(json!({ "ok": true, "data": data }))).into_response()
}

/// POST /iframe - Validate a URL or pasted embed code.
async fn iframe_post_handler(State(state): State<AppState>, body: Bytes) -> Response {
    let request: IframeRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            return RelayError::InvalidInput(format!("invalid JSON body: {}", e)).into_response()
        }
    };

    let result = match (request.embed_code, request.url) {
        (Some(code), _) if !code.trim().is_empty() => state.sanitizer.validate_embed_code(&code),
        (_, Some(url)) => state.sanitizer.validate_share_url(&url),
        _ => Err(RelayError::InvalidInput(
            "body must contain url or embedCode".to_string(),
        )),
    };

    match result {
        Ok(descriptor) => {
            info!(
                target: targets::HTTP,
                platform = %descriptor.platform,
                sanitized = %descriptor.sanitized_url,
                "iframe validated"
            );
            descriptor_response(descriptor)
        }
        Err(e) => e.into_response(),
    }
}

/// GET /iframe?url= - Same validation as POST, for manual testing.
async fn iframe_get_handler(
    State(state): State<AppState>,
    Query(query): Query<IframeQuery>,
) -> Response {
    match query.url {
        Some(url) => match state.sanitizer.validate_share_url(&url) {
            Ok(descriptor) => descriptor_response(descriptor),
            Err(e) => e.into_response(),
        },
        None => (
            StatusCode::OK,
            Json(json!({
                "ok": true,
                "usage": {
                    "get": "GET /iframe?url=<embed or share url>",
                    "post": "POST /iframe with {\"url\": \"...\"} or {\"embedCode\": \"<iframe src=...>\"}",
                    "example": "/iframe?url=https://www.youtube.com/watch?v=dQw4w9WgXcQ",
                },
                "allowedHosts": state.sanitizer.allow_list().len(),
            })),
        )
            .into_response(),
    }
}

// ============================================================================
// Health and stats
// ============================================================================

/// GET /health - Liveness probe.
async fn health_handler(State(state): State<AppState>) -> Response {
    let uptime = chrono::Utc::now().timestamp() - state.start_time;
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "uptimeSeconds": uptime,
            "cacheSize": state.pipeline.cache().len(),
        })),
    )
        .into_response()
}

/// GET /stats - Cache counters, limits and table sizes.
async fn stats_handler(State(state): State<AppState>) -> Response {
    let mime = state.pipeline.mime();
    (
        StatusCode::OK,
        Json(json!({
            "cache": state.pipeline.cache().stats(),
            "limits": {
                "maxBytes": state.policy.max_bytes,
                "timeoutMs": state.policy.timeout_ms,
                "maxRedirects": state.policy.max_redirects,
            },
            "allowLists": {
                "media": state.pipeline.allow_list().len(),
                "iframe": state.sanitizer.allow_list().len(),
            },
            "mimeTypes": {
                "image": mime.class_len(MediaClass::Image),
                "video": mime.class_len(MediaClass::Video),
                "audio": mime.class_len(MediaClass::Audio),
            },
        })),
    )
        .into_response()
}

async fn not_found_handler() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "ok": false, "error": "not found", "code": "NOT_FOUND" })),
    )
        .into_response()
}

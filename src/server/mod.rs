//! Server module
//!
//! HTTP router, response hardening middleware and testable startup.

pub mod headers;
pub mod http;
pub mod startup;

pub use http::{create_router, create_router_with_middleware, AppState, MiddlewareConfig};
pub use startup::{run_server_with_config, ServerConfig, ServerHandle};

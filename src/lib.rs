//! media-relay library
//!
//! Trust-boundary media relay: fetches allow-listed media on behalf of
//! untrusted clients with SSRF protection, type and size limits and an
//! in-memory cache, and validates iframe embeds against a platform
//! allow-list.

pub mod cli;
pub mod config;
pub mod embed;
pub mod error;
pub mod logging;
pub mod media;
pub mod security;
pub mod server;

pub use error::RelayError;

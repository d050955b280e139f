//! Security primitives shared by the media relay and the iframe sanitizer
//!
//! - [`allowlist`] - hostname allow-list matching
//! - [`mime`] - content-type classification
//! - [`ssrf`] - private address rejection after DNS resolution

pub mod allowlist;
pub mod mime;
pub mod ssrf;

pub use allowlist::{is_host_allowed, HostAllowList};
pub use mime::{MediaClass, MimeClassifier};
pub use ssrf::{is_private_ip, HickoryResolver, HostResolver, SsrfError, SsrfGuard, StaticResolver};

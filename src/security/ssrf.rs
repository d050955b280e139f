//! SSRF guard
//!
//! Blocks outbound requests to:
//! - IPv4 private ranges: 10.0.0.0/8, 172.16.0.0/12, 192.168.0.0/16
//! - IPv4 link-local: 169.254.0.0/16 (includes cloud metadata 169.254.169.254)
//! - IPv4 loopback 127.0.0.0/8 and "this network" 0.0.0.0/8
//! - IPv4 CGNAT 100.64.0.0/10, documentation nets, multicast, 240.0.0.0/4
//! - IPv6 loopback, unspecified, ULA fc00::/7, link-local fe80::/10,
//!   multicast and documentation
//! - IPv6 forms that carry an IPv4 address (IPv4-mapped, NAT64 64:ff9b::/96,
//!   6to4 2002::/16) when the embedded address is private
//! - localhost and cloud metadata hostnames, before any DNS lookup
//!
//! # DNS Rebinding
//!
//! The check runs on the *resolved* addresses, and every resolved address
//! must be public. The validated addresses are returned so the caller can pin
//! the outbound connection to them instead of resolving the name again.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use async_trait::async_trait;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::error::ResolveError;
use hickory_resolver::system_conf;
use hickory_resolver::TokioAsyncResolver;
use thiserror::Error;
use tracing::{debug, warn};

/// SSRF check failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SsrfError {
    /// Host is, or resolves to, a non-public address
    #[error("{host} blocked: {reason}")]
    Blocked { host: String, reason: String },

    /// Host could not be resolved
    #[error("failed to resolve {host}: {message}")]
    Resolution { host: String, message: String },
}

/// Hostname resolution seam
#[async_trait]
pub trait HostResolver: Send + Sync {
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>, String>;
}

/// DNS through hickory-resolver, using the host's resolver configuration
/// (`/etc/resolv.conf` or the platform equivalent).
pub struct HickoryResolver {
    resolver: TokioAsyncResolver,
}

impl HickoryResolver {
    pub fn new() -> Self {
        let (config, opts) = resolver_config(system_conf::read_system_conf());
        Self {
            resolver: TokioAsyncResolver::tokio(config, opts),
        }
    }
}

/// Pick the system resolver configuration, or hickory's default upstreams
/// when the system one cannot be read.
fn resolver_config(
    system: Result<(ResolverConfig, ResolverOpts), ResolveError>,
) -> (ResolverConfig, ResolverOpts) {
    match system {
        Ok(conf) => conf,
        Err(e) => {
            warn!(
                target: "media",
                error = %e,
                "system resolver configuration unavailable, using public default resolvers"
            );
            (ResolverConfig::default(), ResolverOpts::default())
        }
    }
}

impl Default for HickoryResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HostResolver for HickoryResolver {
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>, String> {
        let lookup = self
            .resolver
            .lookup_ip(host)
            .await
            .map_err(|e| e.to_string())?;
        Ok(lookup.iter().collect())
    }
}

/// Fixed answers, for tests and offline checks
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    answers: HashMap<String, Vec<IpAddr>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the addresses `host` resolves to
    pub fn with(mut self, host: &str, ips: &[IpAddr]) -> Self {
        self.answers
            .insert(host.to_ascii_lowercase(), ips.to_vec());
        self
    }
}

#[async_trait]
impl HostResolver for StaticResolver {
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>, String> {
        self.answers
            .get(&host.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| "no such host".to_string())
    }
}

/// Resolves hostnames and rejects private destinations
#[derive(Clone)]
pub struct SsrfGuard {
    resolver: Arc<dyn HostResolver>,
}

impl SsrfGuard {
    pub fn new(resolver: Arc<dyn HostResolver>) -> Self {
        Self { resolver }
    }

    /// Guard backed by system DNS
    pub fn system() -> Self {
        Self::new(Arc::new(HickoryResolver::new()))
    }

    /// Resolve `host` and return its addresses if every one is public.
    ///
    /// IP literals (bracketed IPv6 included) are checked without DNS.
    pub async fn resolve_public(&self, host: &str) -> Result<Vec<IpAddr>, SsrfError> {
        let host = strip_brackets(host.trim()).to_ascii_lowercase();
        let blocked = |reason: String| SsrfError::Blocked {
            host: host.clone(),
            reason,
        };

        if host.is_empty() {
            return Err(blocked("empty host".to_string()));
        }
        if is_localhost(&host) {
            return Err(blocked("localhost address".to_string()));
        }
        if is_metadata_host(&host) {
            return Err(blocked("cloud metadata endpoint".to_string()));
        }

        if let Ok(ip) = host.parse::<IpAddr>() {
            if is_private_ip(&ip) {
                return Err(blocked(format!("private IP address {}", ip)));
            }
            return Ok(vec![ip]);
        }

        let ips = self
            .resolver
            .resolve(&host)
            .await
            .map_err(|message| SsrfError::Resolution {
                host: host.clone(),
                message,
            })?;

        if ips.is_empty() {
            return Err(SsrfError::Resolution {
                host: host.clone(),
                message: "no addresses returned".to_string(),
            });
        }

        if let Some(ip) = ips.iter().find(|ip| is_private_ip(ip)) {
            warn!(target: "media", host = %host, resolved_ip = %ip, "host resolved to private address");
            return Err(blocked(format!("resolved to private IP {}", ip)));
        }

        debug!(target: "media", host = %host, addresses = ips.len(), "resolved and validated");
        Ok(ips)
    }

    /// `Ok(true)` when `host` is or resolves to a non-public address.
    /// Resolution failure is an error, not a verdict.
    pub async fn is_private_address(&self, host: &str) -> Result<bool, SsrfError> {
        match self.resolve_public(host).await {
            Ok(_) => Ok(false),
            Err(SsrfError::Blocked { .. }) => Ok(true),
            Err(e) => Err(e),
        }
    }
}

fn strip_brackets(host: &str) -> &str {
    host.strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host)
}

fn is_localhost(host: &str) -> bool {
    host == "localhost" || host == "localhost.localdomain" || host.ends_with(".localhost")
}

fn is_metadata_host(host: &str) -> bool {
    host == "instance-data"
        || host == "metadata"
        || host == "metadata.google.internal"
        || host.ends_with(".internal")
}

/// Whether `ip` is outside public unicast space
pub fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => is_private_ipv4(ipv4),
        IpAddr::V6(ipv6) => is_private_ipv6(ipv6),
    }
}

fn is_private_ipv4(ip: &Ipv4Addr) -> bool {
    let octets = ip.octets();

    // 10.0.0.0/8
    if octets[0] == 10 {
        return true;
    }

    // 172.16.0.0/12
    if octets[0] == 172 && (16..=31).contains(&octets[1]) {
        return true;
    }

    // 192.168.0.0/16
    if octets[0] == 192 && octets[1] == 168 {
        return true;
    }

    // 127.0.0.0/8 - Loopback
    if octets[0] == 127 {
        return true;
    }

    // 169.254.0.0/16 - Link-local and metadata
    if octets[0] == 169 && octets[1] == 254 {
        return true;
    }

    // 0.0.0.0/8 - Current network
    if octets[0] == 0 {
        return true;
    }

    // 100.64.0.0/10 - Carrier-grade NAT
    if octets[0] == 100 && (64..=127).contains(&octets[1]) {
        return true;
    }

    // 192.0.0.0/24 - IETF protocol assignments
    if octets[0] == 192 && octets[1] == 0 && octets[2] == 0 {
        return true;
    }

    // 192.0.2.0/24, 198.51.100.0/24, 203.0.113.0/24 - TEST-NET
    if (octets[0] == 192 && octets[1] == 0 && octets[2] == 2)
        || (octets[0] == 198 && octets[1] == 51 && octets[2] == 100)
        || (octets[0] == 203 && octets[1] == 0 && octets[2] == 113)
    {
        return true;
    }

    // 224.0.0.0/4 multicast, 240.0.0.0/4 reserved (includes broadcast)
    octets[0] >= 224
}

fn is_private_ipv6(ip: &Ipv6Addr) -> bool {
    let segments = ip.segments();

    if *ip == Ipv6Addr::LOCALHOST || *ip == Ipv6Addr::UNSPECIFIED {
        return true;
    }

    // fc00::/7 - Unique local addresses
    if (segments[0] & 0xfe00) == 0xfc00 {
        return true;
    }

    // fe80::/10 - Link-local
    if (segments[0] & 0xffc0) == 0xfe80 {
        return true;
    }

    // ff00::/8 - Multicast
    if (segments[0] & 0xff00) == 0xff00 {
        return true;
    }

    // ::ffff:0:0/96 - IPv4-mapped, judged by the embedded IPv4 address
    if let Some(ipv4) = ip.to_ipv4_mapped() {
        return is_private_ipv4(&ipv4);
    }

    // 64:ff9b::/96 - NAT64 well-known prefix, IPv4 in the low 32 bits
    if segments[..6] == [0x0064, 0xff9b, 0, 0, 0, 0] {
        return is_private_ipv4(&embedded_ipv4(segments[6], segments[7]));
    }

    // 2002::/16 - 6to4, IPv4 in the 32 bits after the prefix
    if segments[0] == 0x2002 {
        return is_private_ipv4(&embedded_ipv4(segments[1], segments[2]));
    }

    // 2001:db8::/32 - Documentation
    segments[0] == 0x2001 && segments[1] == 0x0db8
}

fn embedded_ipv4(high: u16, low: u16) -> Ipv4Addr {
    Ipv4Addr::from((u32::from(high) << 16) | u32::from(low))
}

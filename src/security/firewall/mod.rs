//! Network firewall: fail-closed outbound address and URL decisions.
//!
//! The default answer is deny. An address is allowed only through one of
//! three affirmative paths: literal IP inside an allowed range, exact
//! endpoint allowlist match, or DNS-allowlist resolution landing inside an
//! allowed range.

use crate::policy::SecurityPolicy;
use ipnet::IpNet;
use lru::LruCache;
use std::net::{IpAddr, ToSocketAddrs};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};
use url::Host;

/// Upper bound on cached DNS resolutions.
pub const DNS_CACHE_MAX_ENTRIES: usize = 1000;
/// Cached resolutions older than this are re-resolved.
pub const DNS_CACHE_TTL: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SecurityError {
    #[error("Access denied: port {0} is blocked by policy")]
    PortBlocked(u16),

    #[error("Access denied: address {host}:{port} is not allowed")]
    AddressNotAllowed { host: String, port: u16 },

    #[error("Access denied: {host}:{port} is not allowed")]
    HostNotAllowed { host: String, port: u16 },

    #[error("DNS resolution disabled by policy for: {0}")]
    DnsDisabled(String),

    #[error("DNS resolution not allowed for: {0}")]
    DnsNotAllowed(String),

    #[error("DNS resolution failed for {host}: {reason}")]
    ResolutionFailed { host: String, reason: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),
}

struct CachedResolution {
    ip: IpAddr,
    inserted_at: Instant,
}

type Resolver = Box<dyn Fn(&str) -> std::io::Result<IpAddr> + Send + Sync>;

/// Resolve via the host system's resolver, taking the first address.
/// Blocking by design; the firewall has no suspension points of its own.
fn system_resolve(host: &str) -> std::io::Result<IpAddr> {
    let mut addrs = (host, 80u16).to_socket_addrs()?;
    addrs
        .next()
        .map(|a| a.ip())
        .ok_or_else(|| std::io::Error::other("no addresses returned"))
}

pub struct NetworkFirewall {
    policy: Arc<SecurityPolicy>,
    allowed_networks: Vec<IpNet>,
    dns_cache: Mutex<LruCache<String, CachedResolution>>,
    resolver: Resolver,
}

impl NetworkFirewall {
    pub fn new(policy: Arc<SecurityPolicy>) -> Self {
        let mut allowed_networks = Vec::new();
        for cidr in &policy.network.allowed_ranges {
            match cidr.parse::<IpNet>() {
                Ok(net) => allowed_networks.push(net),
                // A bare IP counts as a /32 (or /128) range.
                Err(_) => match cidr.parse::<IpAddr>() {
                    Ok(ip) => allowed_networks.push(IpNet::from(ip)),
                    Err(_) => warn!("firewall: ignoring invalid CIDR in policy: {}", cidr),
                },
            }
        }

        Self {
            policy,
            allowed_networks,
            dns_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(DNS_CACHE_MAX_ENTRIES).expect("cache capacity"),
            )),
            resolver: Box::new(system_resolve),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_resolver(
        policy: Arc<SecurityPolicy>,
        resolver: impl Fn(&str) -> std::io::Result<IpAddr> + Send + Sync + 'static,
    ) -> Self {
        let mut firewall = Self::new(policy);
        firewall.resolver = Box::new(resolver);
        firewall
    }

    fn is_ip_allowed(&self, ip: IpAddr) -> bool {
        self.allowed_networks.iter().any(|net| net.contains(&ip))
    }

    /// Resolve a hostname through the bounded TTL cache.
    ///
    /// Resolution failure is a deny, not a pass-through.
    fn resolve_hostname(&self, host: &str) -> Result<IpAddr, SecurityError> {
        {
            let mut cache = self.dns_cache.lock().expect("dns cache lock");
            if let Some(entry) = cache.get(host) {
                if entry.inserted_at.elapsed() < DNS_CACHE_TTL {
                    return Ok(entry.ip);
                }
                cache.pop(host);
            }
        }

        let ip = (self.resolver)(host).map_err(|e| SecurityError::ResolutionFailed {
            host: host.to_string(),
            reason: e.to_string(),
        })?;
        debug!("firewall: resolved {} -> {}", host, ip);

        let mut cache = self.dns_cache.lock().expect("dns cache lock");
        cache.put(
            host.to_string(),
            CachedResolution {
                ip,
                inserted_at: Instant::now(),
            },
        );
        Ok(ip)
    }

    /// Decide whether outbound access to `host:port` is permitted.
    pub fn validate_address(&self, host: &str, port: u16) -> Result<(), SecurityError> {
        if self.policy.is_port_blocked(port) {
            return Err(SecurityError::PortBlocked(port));
        }

        // Literal IPs are judged purely by range membership.
        if let Ok(ip) = host.parse::<IpAddr>() {
            if self.is_ip_allowed(ip) {
                return Ok(());
            }
            return Err(SecurityError::AddressNotAllowed {
                host: host.to_string(),
                port,
            });
        }

        if host == "localhost" {
            return Ok(());
        }

        // Exact endpoint allowlist match: the resolved IP need not fall in
        // an allowed range, but the name must still resolve.
        if self.policy.is_endpoint_allowed(host, port) {
            self.resolve_hostname(host)?;
            return Ok(());
        }

        // Last path: DNS allowlist plus range membership.
        if !self.policy.network.allow_dns {
            return Err(SecurityError::DnsDisabled(host.to_string()));
        }
        if !self.policy.is_dns_allowed(host) {
            return Err(SecurityError::DnsNotAllowed(host.to_string()));
        }

        let ip = self.resolve_hostname(host)?;
        if self.is_ip_allowed(ip) {
            return Ok(());
        }
        Err(SecurityError::HostNotAllowed {
            host: host.to_string(),
            port,
        })
    }

    /// Decide whether fetching `url` is permitted. Only http and https are
    /// recognized; the port defaults by scheme.
    pub fn validate_url(&self, url: &str) -> Result<(), SecurityError> {
        let parsed =
            url::Url::parse(url).map_err(|_| SecurityError::InvalidUrl(url.to_string()))?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(SecurityError::UnsupportedScheme(parsed.scheme().to_string()));
        }

        let host = match parsed.host() {
            Some(Host::Domain(d)) => d.to_string(),
            Some(Host::Ipv4(a)) => a.to_string(),
            Some(Host::Ipv6(a)) => a.to_string(),
            None => return Err(SecurityError::InvalidUrl(url.to_string())),
        };

        let port = parsed
            .port_or_known_default()
            .ok_or_else(|| SecurityError::InvalidUrl(url.to_string()))?;

        self.validate_address(&host, port)
    }

    #[cfg(test)]
    pub(crate) fn dns_cache_len(&self) -> usize {
        self.dns_cache.lock().expect("dns cache lock").len()
    }
}

#[cfg(test)]
mod tests;

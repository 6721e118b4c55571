use super::*;
use crate::policy::parse_policy;
use std::sync::atomic::{AtomicUsize, Ordering};

fn policy(yaml: &str) -> Arc<SecurityPolicy> {
    Arc::new(parse_policy(yaml).unwrap())
}

fn loopback_policy() -> Arc<SecurityPolicy> {
    policy("version: \"1.0\"\nnetwork:\n  allowed_ranges: [\"127.0.0.0/8\"]\n")
}

#[test]
fn empty_policy_denies_everything() {
    let fw = NetworkFirewall::new(policy("version: \"1.0\"\n"));
    assert!(fw.validate_address("8.8.8.8", 443).is_err());
    assert!(fw.validate_address("10.0.0.1", 80).is_err());
    assert!(fw.validate_address("example.com", 443).is_err());
    // localhost is the single unconditional exception.
    assert!(fw.validate_address("localhost", 8080).is_ok());
}

#[test]
fn ip_in_allowed_range_permitted() {
    let fw = NetworkFirewall::new(loopback_policy());
    assert!(fw.validate_address("127.0.0.1", 8080).is_ok());
    assert!(fw.validate_address("127.1.2.3", 80).is_ok());
}

#[test]
fn ip_outside_allowed_range_denied() {
    let fw = NetworkFirewall::new(loopback_policy());
    let err = fw.validate_address("8.8.8.8", 443).unwrap_err();
    assert!(err.to_string().contains("not allowed"));
}

#[test]
fn blocked_port_denied_even_on_allowed_host() {
    let fw = NetworkFirewall::new(policy(
        "version: \"1.0\"\nnetwork:\n  allowed_ranges: [\"127.0.0.0/8\"]\n  blocked_ports: [22]\n",
    ));
    assert!(matches!(
        fw.validate_address("127.0.0.1", 22),
        Err(SecurityError::PortBlocked(22))
    ));
    // Blocked port also beats the localhost exception.
    assert!(fw.validate_address("localhost", 22).is_err());
}

#[test]
fn bare_ip_in_allowed_ranges_treated_as_single_host() {
    let fw = NetworkFirewall::new(policy(
        "version: \"1.0\"\nnetwork:\n  allowed_ranges: [\"192.0.2.7\"]\n",
    ));
    assert!(fw.validate_address("192.0.2.7", 443).is_ok());
    assert!(fw.validate_address("192.0.2.8", 443).is_err());
}

#[test]
fn invalid_cidr_is_ignored_not_fatal() {
    let fw = NetworkFirewall::new(policy(
        "version: \"1.0\"\nnetwork:\n  allowed_ranges: [\"not-a-cidr\", \"127.0.0.0/8\"]\n",
    ));
    assert!(fw.validate_address("127.0.0.1", 80).is_ok());
}

#[test]
fn ipv6_range_membership() {
    let fw = NetworkFirewall::new(policy(
        "version: \"1.0\"\nnetwork:\n  allowed_ranges: [\"::1/128\"]\n",
    ));
    assert!(fw.validate_address("::1", 443).is_ok());
    assert!(fw.validate_address("2001:db8::1", 443).is_err());
}

#[test]
fn hostname_without_dns_denied() {
    let fw = NetworkFirewall::new(loopback_policy());
    assert!(matches!(
        fw.validate_address("example.com", 443),
        Err(SecurityError::DnsDisabled(_))
    ));
}

#[test]
fn hostname_not_in_dns_allowlist_denied() {
    let fw = NetworkFirewall::new(policy(
        "version: \"1.0\"\nnetwork:\n  allow_dns: true\n  dns_allowlist: [good.example]\n",
    ));
    assert!(matches!(
        fw.validate_address("evil.example", 443),
        Err(SecurityError::DnsNotAllowed(_))
    ));
}

#[test]
fn allowlisted_hostname_resolving_into_range_permitted() {
    let pol = policy(
        "version: \"1.0\"\nnetwork:\n  allowed_ranges: [\"127.0.0.0/8\"]\n  allow_dns: true\n  dns_allowlist: [good.example]\n",
    );
    let fw = NetworkFirewall::with_resolver(pol, |_| Ok(IpAddr::from([127, 0, 0, 1])));
    assert!(fw.validate_address("good.example", 443).is_ok());
}

#[test]
fn allowlisted_hostname_resolving_outside_range_denied() {
    let pol = policy(
        "version: \"1.0\"\nnetwork:\n  allowed_ranges: [\"127.0.0.0/8\"]\n  allow_dns: true\n  dns_allowlist: [good.example]\n",
    );
    let fw = NetworkFirewall::with_resolver(pol, |_| Ok(IpAddr::from([8, 8, 8, 8])));
    assert!(matches!(
        fw.validate_address("good.example", 443),
        Err(SecurityError::HostNotAllowed { .. })
    ));
}

#[test]
fn endpoint_allowlist_bypasses_range_check() {
    let pol = policy(
        "version: \"1.0\"\nnetwork:\n  allowed_endpoints:\n    - host: api.example\n      ports: [443]\n",
    );
    let fw = NetworkFirewall::with_resolver(pol, |_| Ok(IpAddr::from([93, 184, 216, 34])));
    assert!(fw.validate_address("api.example", 443).is_ok());
    // Wrong port falls through to the DNS path, which is disabled.
    assert!(fw.validate_address("api.example", 80).is_err());
}

#[test]
fn resolution_failure_is_a_deny() {
    let pol = policy(
        "version: \"1.0\"\nnetwork:\n  allowed_endpoints:\n    - host: api.example\n      ports: [443]\n",
    );
    let fw = NetworkFirewall::with_resolver(pol, |_| {
        Err(std::io::Error::other("name or service not known"))
    });
    assert!(matches!(
        fw.validate_address("api.example", 443),
        Err(SecurityError::ResolutionFailed { .. })
    ));
}

#[test]
fn dns_cache_resolves_once_within_ttl() {
    let counter = Arc::new(AtomicUsize::new(0));
    let seen = counter.clone();
    let pol = policy(
        "version: \"1.0\"\nnetwork:\n  allowed_ranges: [\"127.0.0.0/8\"]\n  allow_dns: true\n  dns_allowlist: [good.example]\n",
    );
    let fw = NetworkFirewall::with_resolver(pol, move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
        Ok(IpAddr::from([127, 0, 0, 1]))
    });

    for _ in 0..5 {
        fw.validate_address("good.example", 443).unwrap();
    }
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(fw.dns_cache_len(), 1);
}

#[test]
fn dns_cache_is_bounded() {
    let pol = policy(
        "version: \"1.0\"\nnetwork:\n  allowed_endpoints:\n    - host: api.example\n      ports: [443]\n",
    );
    let fw = NetworkFirewall::with_resolver(pol, |_| Ok(IpAddr::from([127, 0, 0, 1])));
    // Insert well past capacity directly through the resolver path.
    for i in 0..(DNS_CACHE_MAX_ENTRIES + 50) {
        let _ = fw.resolve_hostname(&format!("host{}.example", i));
    }
    assert!(fw.dns_cache_len() <= DNS_CACHE_MAX_ENTRIES);
}

#[test]
fn validate_url_happy_path() {
    let fw = NetworkFirewall::new(loopback_policy());
    assert!(fw.validate_url("http://127.0.0.1:8080/path").is_ok());
    assert!(fw.validate_url("https://127.0.0.1/").is_ok());
}

#[test]
fn validate_url_denies_ip_outside_ranges() {
    let fw = NetworkFirewall::new(loopback_policy());
    let err = fw.validate_url("https://8.8.8.8/").unwrap_err();
    assert!(err.to_string().contains("not allowed"));
    // Default port by scheme: https means 443.
    assert!(matches!(
        err,
        SecurityError::AddressNotAllowed { port: 443, .. }
    ));
}

#[test]
fn validate_url_default_port_http() {
    let fw = NetworkFirewall::new(policy(
        "version: \"1.0\"\nnetwork:\n  allowed_ranges: [\"127.0.0.0/8\"]\n  blocked_ports: [80]\n",
    ));
    assert!(matches!(
        fw.validate_url("http://127.0.0.1/"),
        Err(SecurityError::PortBlocked(80))
    ));
}

#[test]
fn validate_url_rejects_non_http_schemes() {
    let fw = NetworkFirewall::new(loopback_policy());
    assert!(matches!(
        fw.validate_url("ftp://127.0.0.1/file"),
        Err(SecurityError::UnsupportedScheme(_))
    ));
    assert!(matches!(
        fw.validate_url("file:///etc/passwd"),
        Err(SecurityError::UnsupportedScheme(_))
    ));
}

#[test]
fn validate_url_rejects_malformed() {
    let fw = NetworkFirewall::new(loopback_policy());
    assert!(fw.validate_url("not a url").is_err());
    assert!(fw.validate_url("http://").is_err());
}

#[test]
fn validate_url_ipv6_host() {
    let fw = NetworkFirewall::new(policy(
        "version: \"1.0\"\nnetwork:\n  allowed_ranges: [\"::1/128\"]\n",
    ));
    assert!(fw.validate_url("http://[::1]:8080/").is_ok());
}

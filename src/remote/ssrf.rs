//! SSRF guard for attachment downloads.
//!
//! Validates a URL before any network access: scheme must be http or https,
//! and the host must not resolve to a private, loopback, link-local, or
//! cloud-metadata address. Callers re-apply this check to every redirect hop,
//! not just the initial URL.
//!
//! Deployments that mirror between intranet instances can opt in to private
//! address ranges. Link-local and metadata addresses are rejected
//! unconditionally; no configuration reaches them.

use std::net::IpAddr;

use tokio::net::lookup_host;
use url::{Host, Url};

use crate::error::RemoteError;

/// What the guard lets through.
#[derive(Debug, Clone, Copy, Default)]
pub struct SsrfPolicy {
    /// Permit loopback, RFC1918, CGNAT, and unique-local destinations
    /// (self-hosted instances on internal networks).
    pub allow_private_networks: bool,
}

impl SsrfPolicy {
    /// Reject everything non-public. The default.
    pub fn strict() -> Self {
        Self::default()
    }
}

/// Validate one URL. Resolves DNS for named hosts; every resolved address
/// must be permitted by the policy.
pub async fn validate_url(url: &Url, policy: SsrfPolicy) -> Result<(), RemoteError> {
    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(reject(url, format!("scheme '{other}' is not allowed")));
        }
    }

    let port = url
        .port_or_known_default()
        .ok_or_else(|| reject(url, "URL has no usable port".to_string()))?;

    match url.host() {
        None => Err(reject(url, "URL has no host".to_string())),
        Some(Host::Ipv4(addr)) => check_addr(url, IpAddr::V4(addr), policy),
        Some(Host::Ipv6(addr)) => check_addr(url, IpAddr::V6(addr), policy),
        Some(Host::Domain(domain)) => {
            let addrs = lookup_host((domain, port))
                .await
                .map_err(|err| reject(url, format!("hostname '{domain}' did not resolve: {err}")))?;
            let mut resolved_any = false;
            for addr in addrs {
                resolved_any = true;
                check_addr(url, addr.ip(), policy)?;
            }
            if resolved_any {
                Ok(())
            } else {
                Err(reject(
                    url,
                    format!("hostname '{domain}' resolved to no addresses"),
                ))
            }
        }
    }
}

fn check_addr(url: &Url, addr: IpAddr, policy: SsrfPolicy) -> Result<(), RemoteError> {
    if let Some(reason) = forbidden_reason(addr, policy) {
        Err(reject(url, format!("{addr} is {reason}")))
    } else {
        Ok(())
    }
}

fn reject(url: &Url, reason: String) -> RemoteError {
    RemoteError::SsrfRejected {
        url: url.to_string(),
        reason,
    }
}

/// Why an address is off-limits under `policy`, or `None` if reachable.
fn forbidden_reason(addr: IpAddr, policy: SsrfPolicy) -> Option<&'static str> {
    let private_ok = policy.allow_private_networks;
    match addr {
        IpAddr::V4(v4) => {
            let octets = v4.octets();
            if v4.is_unspecified() || octets[0] == 0 {
                Some("an unspecified address")
            } else if v4.is_link_local() {
                // Includes 169.254.169.254, the cloud metadata endpoint.
                // Never reachable, regardless of policy.
                Some("a link-local address")
            } else if v4.is_broadcast() {
                Some("the broadcast address")
            } else if v4.is_loopback() {
                (!private_ok).then_some("a loopback address")
            } else if v4.is_private() {
                (!private_ok).then_some("a private (RFC1918) address")
            } else if octets[0] == 100 && (64..128).contains(&octets[1]) {
                (!private_ok).then_some("a carrier-grade NAT (RFC6598) address")
            } else if octets[0] == 192 && octets[1] == 0 && octets[2] == 0 {
                Some("an IETF protocol assignment address")
            } else {
                None
            }
        }
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return forbidden_reason(IpAddr::V4(mapped), policy);
            }
            let first = v6.segments()[0];
            if v6.is_unspecified() {
                Some("an unspecified address")
            } else if (first & 0xffc0) == 0xfe80 {
                Some("a link-local address")
            } else if v6.is_loopback() {
                (!private_ok).then_some("a loopback address")
            } else if (first & 0xfe00) == 0xfc00 {
                (!private_ok).then_some("a unique-local address")
            } else {
                None
            }
        }
    }
}

//! Client IP resolution and privacy-preserving IP hashing.
//!
//! The raw client IP is only ever held for the duration of context
//! construction. Everything downstream (logs, rate-limit keys, error reports)
//! sees [`hash_ip`] output instead.
//!
//! # Resolution Order
//!
//! 1. First entry of `X-Forwarded-For` (the original client, as set by the edge proxy)
//! 2. `X-Real-IP`
//! 3. Socket peer address (`ConnectInfo<SocketAddr>`)
//! 4. [`UNKNOWN_IP`]
//!
//! # IP Spoofing Mitigation
//!
//! Forwarding headers are client-controlled unless a trusted proxy overwrites
//! them. When `TRUSTED_PROXIES` is configured and the socket peer is known and
//! outside every range, the headers are ignored and the peer address wins.
//! With no ranges configured all forwarding headers are believed, which is
//! only safe when the service cannot be reached except through the proxy.
//!
//! # Internal Architecture
//!
//! ```text
//!   ┌──────────────────────────┐     ┌──────────────────────┐
//!   │  extract_ip_from_headers │     │  peer_ip (ConnectInfo)│
//!   │  (no allocations)        │     └──────────┬───────────┘
//!   └───────────┬──────────────┘                │
//!               └──────────────┬────────────────┘
//!                              ▼
//!                 ┌───────────────────────────┐
//!                 │    resolve_client_ip      │ ← trusted proxy check
//!                 │    Cow<'static, str>      │
//!                 └─────────────┬─────────────┘
//!                               ▼
//!                           hash_ip()
//! ```

use std::borrow::Cow;
use std::net::{IpAddr, SocketAddr};

use axum::extract::ConnectInfo;
use axum::http::Request;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

/// Fallback IP value when no client IP can be determined.
///
/// All such requests share one hash and therefore one rate-limit key per route.
pub const UNKNOWN_IP: &str = "unknown";

/// Hex characters kept from the SHA-256 digest.
pub const IP_HASH_LEN: usize = 16;

/// One-way digest of a client IP: the first 16 hex characters of SHA-256.
///
/// Deterministic within and across processes (no salt), so the same client
/// maps to the same rate-limit key. This is log hygiene rather than a
/// security boundary: the IPv4 space is small enough to enumerate.
pub fn hash_ip(ip: &str) -> String {
    let mut hex = hex::encode(Sha256::digest(ip.as_bytes()));
    hex.truncate(IP_HASH_LEN);
    hex
}

// =============================================================================
// Trusted Proxy CIDR Matching
// =============================================================================

/// Parsed CIDR network range for trusted proxy validation.
#[derive(Debug, Clone)]
pub struct CidrRange {
    network: IpAddr,
    prefix_len: u8,
}

impl CidrRange {
    /// Parse a CIDR notation string (e.g., "10.0.0.0/8" or "::1/128").
    ///
    /// A bare address is treated as a single-host range. Returns `None` if the
    /// format is invalid.
    pub fn parse(cidr: &str) -> Option<Self> {
        let cidr = cidr.trim();

        let Some((addr, prefix)) = cidr.split_once('/') else {
            let network: IpAddr = cidr.parse().ok()?;
            return Some(Self {
                network,
                prefix_len: max_prefix(&network),
            });
        };

        let network: IpAddr = addr.parse().ok()?;
        let prefix_len: u8 = prefix.parse().ok()?;

        (prefix_len <= max_prefix(&network)).then_some(Self {
            network,
            prefix_len,
        })
    }

    /// Check if an IP address is contained within this CIDR range.
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (&self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let mask = u32::MAX
                    .checked_shl(32 - u32::from(self.prefix_len))
                    .unwrap_or(0);
                (u32::from(*net) & mask) == (u32::from(*addr) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let mask = u128::MAX
                    .checked_shl(128 - u32::from(self.prefix_len))
                    .unwrap_or(0);
                (u128::from(*net) & mask) == (u128::from(*addr) & mask)
            }
            _ => false,
        }
    }
}

fn max_prefix(ip: &IpAddr) -> u8 {
    match ip {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

/// Configuration for trusted proxy validation.
#[derive(Debug, Clone, Default)]
pub struct TrustedProxyConfig {
    ranges: Vec<CidrRange>,
}

impl TrustedProxyConfig {
    /// Create a trusted proxy configuration from CIDR strings.
    ///
    /// Invalid CIDR strings are logged as warnings and skipped.
    pub fn new(cidrs: &[String]) -> Self {
        let ranges: Vec<CidrRange> = cidrs
            .iter()
            .filter_map(|cidr| {
                let parsed = CidrRange::parse(cidr);
                if parsed.is_none() {
                    warn!(cidr = %cidr, "Invalid CIDR range in TRUSTED_PROXIES, skipping");
                }
                parsed
            })
            .collect();

        if !ranges.is_empty() {
            debug!(count = ranges.len(), "Trusted proxy validation enabled");
        }

        Self { ranges }
    }

    /// Check if trusted proxy validation is enabled (any ranges configured).
    pub fn is_enabled(&self) -> bool {
        !self.ranges.is_empty()
    }

    /// Check if a peer address may set forwarding headers.
    ///
    /// Always `true` when no ranges are configured.
    pub fn is_trusted(&self, ip: &IpAddr) -> bool {
        self.ranges.is_empty() || self.ranges.iter().any(|range| range.contains(ip))
    }
}

// =============================================================================
// Client IP Extraction
// =============================================================================

#[inline]
fn extract_ip_from_headers<B>(req: &Request<B>) -> Option<&str> {
    // Format: "client, proxy1, proxy2" - the first entry is the client
    if let Some(forwarded) = req.headers().get("x-forwarded-for")
        && let Ok(value) = forwarded.to_str()
        && let Some(first_ip) = value.split(',').next().map(str::trim)
        && !first_ip.is_empty()
    {
        return Some(first_ip);
    }

    if let Some(real_ip) = req.headers().get("x-real-ip")
        && let Ok(value) = real_ip.to_str()
        && !value.trim().is_empty()
    {
        return Some(value.trim());
    }

    None
}

#[inline]
fn peer_ip<B>(req: &Request<B>) -> Option<IpAddr> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

/// Resolve the client IP for a request.
///
/// Returns `Cow::Borrowed(UNKNOWN_IP)` when nothing identifies the caller.
pub fn resolve_client_ip<B>(
    req: &Request<B>,
    trusted_proxies: &TrustedProxyConfig,
) -> Cow<'static, str> {
    let peer = peer_ip(req);

    if let Some(peer) = peer
        && !trusted_proxies.is_trusted(&peer)
    {
        if extract_ip_from_headers(req).is_some() {
            debug!("Ignoring forwarding headers from untrusted peer");
        }
        return Cow::Owned(peer.to_string());
    }

    match (extract_ip_from_headers(req), peer) {
        (Some(ip), _) => Cow::Owned(ip.to_string()),
        (None, Some(peer)) => Cow::Owned(peer.to_string()),
        (None, None) => Cow::Borrowed(UNKNOWN_IP),
    }
}

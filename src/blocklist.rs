//! Blocklists for hostnames and IP addresses.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::cidr::Cidr;
use crate::error::Error;

/// Hostnames that are always blocked (checked before DNS resolution).
pub const BLOCKED_HOSTNAMES: &[&str] = &["localhost", "[::1]"];

/// A blocked range together with a short description for logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRule {
    pub cidr: Cidr,
    pub label: &'static str,
}

const fn rule(cidr: Cidr, label: &'static str) -> BlockRule {
    BlockRule { cidr, label }
}

/// IPv4 ranges that are never a valid replay destination.
pub const BLOCKED_V4: &[BlockRule] = &[
    rule(Cidr::v4([10, 0, 0, 0], 8), "private network"),
    rule(Cidr::v4([172, 16, 0, 0], 12), "private network"),
    rule(Cidr::v4([192, 168, 0, 0], 16), "private network"),
    rule(Cidr::v4([127, 0, 0, 0], 8), "loopback"),
    rule(Cidr::v4([169, 254, 0, 0], 16), "link-local / cloud metadata"),
    rule(Cidr::v4([0, 0, 0, 0], 8), "this network"),
    rule(Cidr::v4([100, 64, 0, 0], 10), "carrier-grade NAT"),
    rule(Cidr::v4([224, 0, 0, 0], 4), "multicast"),
    rule(Cidr::v4([240, 0, 0, 0], 4), "reserved"),
];

/// IPv6 ranges that are never a valid replay destination.
pub const BLOCKED_V6: &[BlockRule] = &[
    rule(Cidr::v6([0, 0, 0, 0, 0, 0, 0, 1], 128), "loopback"),
    rule(Cidr::v6([0xfc00, 0, 0, 0, 0, 0, 0, 0], 7), "unique local"),
    rule(Cidr::v6([0xfe80, 0, 0, 0, 0, 0, 0, 0], 10), "link-local"),
];

/// `::ffff:0:0/96`, IPv4-mapped addresses (RFC 4291 section 2.5.5.2).
const IPV4_MAPPED: Cidr = Cidr::v6([0, 0, 0, 0, 0, 0xffff, 0, 0], 96);

/// `::/96`, the deprecated IPv4-compatible form (RFC 4291 section 2.5.5.1).
const IPV4_COMPATIBLE: Cidr = Cidr::v6([0; 8], 96);

/// Why an address was blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockReason {
    /// The range that matched.
    pub cidr: Cidr,
    /// Short description of the range.
    pub label: &'static str,
    /// Set when an IPv6 address was unwrapped to this IPv4 address before matching.
    pub embedded_v4: Option<Ipv4Addr>,
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.embedded_v4 {
            Some(v4) => write!(f, "{} ({}) via embedded IPv4 {}", self.label, self.cidr, v4),
            None => write!(f, "{} ({})", self.label, self.cidr),
        }
    }
}

/// Tests addresses against the blocked CIDR ranges.
///
/// Pure and `Sync`; safe to share across any number of concurrent callers.
#[derive(Debug, Clone)]
pub struct AddressRangeMatcher {
    v4: Vec<BlockRule>,
    v6: Vec<BlockRule>,
}

impl Default for AddressRangeMatcher {
    fn default() -> Self {
        Self {
            v4: BLOCKED_V4.to_vec(),
            v6: BLOCKED_V6.to_vec(),
        }
    }
}

impl AddressRangeMatcher {
    /// Add another blocked range on top of the defaults.
    pub fn block(&mut self, cidr: Cidr, label: &'static str) {
        match cidr {
            Cidr::V4 { .. } => self.v4.push(rule(cidr, label)),
            Cidr::V6 { .. } => self.v6.push(rule(cidr, label)),
        }
    }

    /// `true` if the address falls in any blocked range.
    pub fn is_blocked(&self, ip: IpAddr) -> bool {
        self.check(ip).is_some()
    }

    /// Parse `input` as an address and test it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAddress`] if `input` is not an IPv4 or IPv6
    /// address. Brackets around IPv6 literals are accepted.
    pub fn is_blocked_str(&self, input: &str) -> Result<bool, Error> {
        let trimmed = input.trim_start_matches('[').trim_end_matches(']');
        let ip: IpAddr = trimmed.parse().map_err(|_| Error::InvalidAddress {
            input: input.to_string(),
        })?;
        Ok(self.is_blocked(ip))
    }

    /// Return the matching rule, if the address is blocked.
    pub fn check(&self, ip: IpAddr) -> Option<BlockReason> {
        match ip {
            IpAddr::V4(v4) => self.check_v4(v4),
            IpAddr::V6(v6) => self.check_v6(v6),
        }
    }

    fn check_v4(&self, ip: Ipv4Addr) -> Option<BlockReason> {
        self.v4
            .iter()
            .find(|r| r.cidr.contains_v4(ip))
            .map(|r| BlockReason {
                cidr: r.cidr,
                label: r.label,
                embedded_v4: None,
            })
    }

    fn check_v6(&self, ip: Ipv6Addr) -> Option<BlockReason> {
        // Mapped addresses are IPv4 addresses in disguise: judge them by the
        // IPv4 rules only, so ::ffff:8.8.8.8 passes and ::ffff:127.0.0.1 doesn't.
        if let Some(v4) = unwrap_embedded_v4(ip) {
            return self.check_v4(v4).map(|reason| BlockReason {
                embedded_v4: Some(v4),
                ..reason
            });
        }

        self.v6
            .iter()
            .find(|r| r.cidr.contains_v6(ip))
            .map(|r| BlockReason {
                cidr: r.cidr,
                label: r.label,
                embedded_v4: None,
            })
    }
}

/// Extract the IPv4 address carried in the low 32 bits of a mapped
/// (`::ffff:a.b.c.d`) or compatible (`::a.b.c.d`) address.
///
/// `::1` is excluded so it is judged as IPv6 loopback.
fn unwrap_embedded_v4(ip: Ipv6Addr) -> Option<Ipv4Addr> {
    let bits = u128::from(ip);
    let low = Ipv4Addr::from((bits & 0xffff_ffff) as u32);
    if IPV4_MAPPED.contains_v6(ip) {
        return Some(low);
    }
    if IPV4_COMPATIBLE.contains_v6(ip) && bits != 1 {
        return Some(low);
    }
    None
}

/// Check a normalized hostname against the fixed hostname blocklist.
pub fn is_hostname_blocked(host: &str) -> Option<&'static str> {
    let host_lower = host.to_lowercase();
    BLOCKED_HOSTNAMES
        .iter()
        .copied()
        .find(|&blocked| host_lower == blocked)
}

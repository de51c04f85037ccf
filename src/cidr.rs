//! CIDR ranges with exact integer arithmetic.
//!
//! IPv4 addresses are handled as `u32` and IPv6 addresses as `u128`.
//! Membership is `(addr & mask) == (network & mask)` where the mask has the
//! top `prefix` bits set.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use ipnet::IpNet;

/// An IPv4 or IPv6 network in CIDR notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cidr {
    V4 { network: u32, prefix: u8 },
    V6 { network: u128, prefix: u8 },
}

impl Cidr {
    /// Build an IPv4 range. Host bits in `addr` are masked off.
    ///
    /// Panics at compile time when used in a `const` with `prefix > 32`.
    pub const fn v4(addr: [u8; 4], prefix: u8) -> Self {
        assert!(prefix <= 32, "IPv4 prefix must be <= 32");
        let network = u32::from_be_bytes(addr) & v4_mask(prefix);
        Self::V4 { network, prefix }
    }

    /// Build an IPv6 range from its eight 16-bit segments.
    pub const fn v6(segments: [u16; 8], prefix: u8) -> Self {
        assert!(prefix <= 128, "IPv6 prefix must be <= 128");
        let mut bits: u128 = 0;
        let mut i = 0;
        while i < 8 {
            bits = (bits << 16) | segments[i] as u128;
            i += 1;
        }
        Self::V6 {
            network: bits & v6_mask(prefix),
            prefix,
        }
    }

    /// Prefix length.
    pub fn prefix(&self) -> u8 {
        match *self {
            Self::V4 { prefix, .. } | Self::V6 { prefix, .. } => prefix,
        }
    }

    /// Check whether `ip` is inside this range.
    ///
    /// Address families never match each other; an IPv4-mapped IPv6 address
    /// is not a member of an IPv4 range here. Unwrapping is the caller's job
    /// (see [`AddressRangeMatcher`](crate::AddressRangeMatcher)).
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (*self, ip) {
            (Self::V4 { network, prefix }, IpAddr::V4(v4)) => contains_v4(network, prefix, v4),
            (Self::V6 { network, prefix }, IpAddr::V6(v6)) => contains_v6(network, prefix, v6),
            _ => false,
        }
    }

    pub(crate) fn contains_v4(&self, ip: Ipv4Addr) -> bool {
        match *self {
            Self::V4 { network, prefix } => contains_v4(network, prefix, ip),
            Self::V6 { .. } => false,
        }
    }

    pub(crate) fn contains_v6(&self, ip: Ipv6Addr) -> bool {
        match *self {
            Self::V6 { network, prefix } => contains_v6(network, prefix, ip),
            Self::V4 { .. } => false,
        }
    }
}

fn contains_v4(network: u32, prefix: u8, ip: Ipv4Addr) -> bool {
    let mask = v4_mask(prefix);
    (u32::from(ip) & mask) == (network & mask)
}

fn contains_v6(network: u128, prefix: u8, ip: Ipv6Addr) -> bool {
    let mask = v6_mask(prefix);
    (u128::from(ip) & mask) == (network & mask)
}

/// Mask with the top `prefix` bits set. `prefix == 0` yields 0 (shifting a
/// `u32` by 32 would overflow).
const fn v4_mask(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - prefix as u32)
    }
}

const fn v6_mask(prefix: u8) -> u128 {
    if prefix == 0 {
        0
    } else {
        u128::MAX << (128 - prefix as u32)
    }
}

impl From<IpNet> for Cidr {
    fn from(net: IpNet) -> Self {
        match net {
            IpNet::V4(n) => Self::v4(n.network().octets(), n.prefix_len()),
            IpNet::V6(n) => Self::v6(n.network().segments(), n.prefix_len()),
        }
    }
}

impl FromStr for Cidr {
    type Err = ipnet::AddrParseError;

    /// Parse `a.b.c.d/n` or `x::y/n`. A bare address is treated as a single-host range.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.parse::<IpNet>() {
            Ok(net) => Ok(net.into()),
            Err(e) => match s.parse::<IpAddr>() {
                Ok(ip) => Ok(IpNet::from(ip).into()),
                Err(_) => Err(e),
            },
        }
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::V4 { network, prefix } => write!(f, "{}/{}", Ipv4Addr::from(network), prefix),
            Self::V6 { network, prefix } => write!(f, "{}/{}", Ipv6Addr::from(network), prefix),
        }
    }
}

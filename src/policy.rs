//! Replay target policy: the built-in ranges plus operator additions.
//!
//! ## Precedence
//!
//! 1. If the IP matches an allow rule → allowed
//! 2. If the IP matches a blocked range (built-in or added) → blocked
//! 3. Otherwise → allowed
//!
//! Hostnames are checked against the fixed blocklist first, then against
//! any added hostname patterns. There is no hostname allow rule.
//!
//! ## Immutability
//!
//! Once built via [`PolicyBuilder::build()`], a [`Policy`] cannot be modified.
//! The builder consumes `self` on each method call.
//!
//! ## Security Considerations
//!
//! **Be careful with [`PolicyBuilder::allow_cidr`].** It overrides the built-in blocks:
//!
//! ```rust
//! use replay_guard::PolicyBuilder;
//!
//! // DANGEROUS: This allows localhost access!
//! let bad_policy = PolicyBuilder::new()
//!     .allow_cidr("127.0.0.0/8".parse().unwrap())
//!     .build();
//! # let _ = bad_policy;
//! ```
//!
//! It is deliberately not reachable from the config file.

use std::net::IpAddr;

use crate::blocklist::{is_hostname_blocked, AddressRangeMatcher, BlockReason};
use crate::cidr::Cidr;

/// An immutable set of address and hostname rules.
///
/// Created via [`PolicyBuilder`]; `Policy::default()` is the built-in
/// blocklist with nothing added.
#[derive(Debug, Clone, Default)]
pub struct Policy {
    matcher: AddressRangeMatcher,
    allowed_cidrs: Vec<Cidr>,
    blocked_hosts: Vec<String>,
}

impl Policy {
    /// Check if an IP address may be connected to.
    ///
    /// Returns `Ok(())` if allowed, `Err(reason)` if blocked.
    pub fn check_ip(&self, ip: IpAddr) -> Result<(), BlockReason> {
        if self.allowed_cidrs.iter().any(|cidr| cidr.contains(ip)) {
            return Ok(());
        }
        match self.matcher.check(ip) {
            Some(reason) => Err(reason),
            None => Ok(()),
        }
    }

    /// Check if a normalized hostname is allowed by this policy.
    ///
    /// Returns `Ok(())` if allowed, `Err(reason)` if blocked.
    /// Hostname matching is case-insensitive.
    pub fn check_hostname(&self, host: &str) -> Result<(), String> {
        if let Some(blocked) = is_hostname_blocked(host) {
            return Err(format!("hostname {} is blocked", blocked));
        }

        let host_lower = host.to_lowercase();
        for pattern in &self.blocked_hosts {
            if matches_hostname_pattern(&host_lower, pattern) {
                return Err(format!("blocked by hostname rule: {}", pattern));
            }
        }

        Ok(())
    }

    /// The underlying range matcher.
    pub fn matcher(&self) -> &AddressRangeMatcher {
        &self.matcher
    }
}

/// Builder for [`Policy`].
#[derive(Debug, Clone, Default)]
pub struct PolicyBuilder {
    matcher: AddressRangeMatcher,
    allowed_cidrs: Vec<Cidr>,
    blocked_hosts: Vec<String>,
}

impl PolicyBuilder {
    /// Start from the built-in blocklist.
    pub fn new() -> Self {
        Self::default()
    }

    /// Block an additional IP range.
    ///
    /// # Example
    /// ```
    /// use replay_guard::PolicyBuilder;
    ///
    /// let policy = PolicyBuilder::new()
    ///     .block_cidr("198.51.100.0/24".parse().unwrap())
    ///     .build();
    /// assert!(policy.check_ip("198.51.100.1".parse().unwrap()).is_err());
    /// ```
    pub fn block_cidr(mut self, cidr: Cidr) -> Self {
        self.matcher.block(cidr, "blocked by policy rule");
        self
    }

    /// Allow an IP range, overriding the blocklist. See the module docs.
    pub fn allow_cidr(mut self, cidr: Cidr) -> Self {
        self.allowed_cidrs.push(cidr);
        self
    }

    /// Block a hostname or pattern.
    ///
    /// Supports wildcards: `*.internal.example.com` (also matches the bare suffix).
    pub fn block_host(mut self, pattern: &str) -> Self {
        let pattern = pattern.trim().trim_end_matches('.').to_lowercase();
        if !pattern.is_empty() {
            self.blocked_hosts.push(pattern);
        }
        self
    }

    /// Build the policy.
    pub fn build(self) -> Policy {
        Policy {
            matcher: self.matcher,
            allowed_cidrs: self.allowed_cidrs,
            blocked_hosts: self.blocked_hosts,
        }
    }
}

/// Match a lowercase hostname against a pattern (supports `*.` prefix).
fn matches_hostname_pattern(host: &str, pattern: &str) -> bool {
    match pattern.strip_prefix("*.") {
        Some(base) => host == base || host.ends_with(&pattern[1..]),
        None => host == pattern,
    }
}

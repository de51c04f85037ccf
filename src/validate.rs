//! Target validation with DNS resolution.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::error::Error;
use crate::policy::Policy;
use crate::resolver::{DnsErrorClass, HickoryResolver, Resolve};
use crate::target_url::TargetUrl;

/// Default bound on a single DNS lookup.
pub const DEFAULT_DNS_TIMEOUT: Duration = Duration::from_secs(4);

/// Result of successful target validation.
#[derive(Debug, Clone)]
pub struct Validated {
    /// The parsed target.
    pub target: TargetUrl,

    /// The verified IP address to connect to: the first resolved address.
    pub pinned: IpAddr,

    /// Every address the name resolved to; all of them passed the policy.
    pub resolved: Vec<IpAddr>,
}

impl Validated {
    /// Get the socket address to connect to.
    pub fn to_socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.pinned, self.target.port())
    }
}

/// Flat form of a validation verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub safe: bool,
    pub reason: Option<String>,
    pub pinned_address: Option<IpAddr>,
}

impl From<&Result<Validated, Error>> for ValidationResult {
    fn from(result: &Result<Validated, Error>) -> Self {
        match result {
            Ok(v) => Self {
                safe: true,
                reason: None,
                pinned_address: Some(v.pinned),
            },
            Err(e) => Self {
                safe: false,
                reason: Some(e.to_string()),
                pinned_address: None,
            },
        }
    }
}

/// Decides whether a user-supplied URL may be replayed against, and which
/// address to connect to if so.
///
/// Holds only immutable configuration; clone it or share it behind an `Arc`.
#[derive(Clone)]
pub struct TargetValidator {
    policy: Arc<Policy>,
    resolver: Arc<dyn Resolve>,
    dns_timeout: Duration,
}

impl Default for TargetValidator {
    fn default() -> Self {
        Self::new(Policy::default(), Arc::new(HickoryResolver))
    }
}

impl TargetValidator {
    pub fn new(policy: Policy, resolver: Arc<dyn Resolve>) -> Self {
        Self {
            policy: Arc::new(policy),
            resolver,
            dns_timeout: DEFAULT_DNS_TIMEOUT,
        }
    }

    /// Override the DNS lookup timeout.
    pub fn with_dns_timeout(mut self, timeout: Duration) -> Self {
        self.dns_timeout = timeout;
        self
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Validate a URL, resolve DNS, and check every address against the policy.
    ///
    /// Gates, in order, stopping at the first failure:
    /// 1. Parse; scheme is http/https; no userinfo; no odd IP encodings
    /// 2. Hostname blocklist, before any DNS traffic
    /// 3. Resolve all A and AAAA records within the DNS timeout
    /// 4. Every resolved address must pass; one blocked address rejects the URL
    ///
    /// The first resolved address becomes [`Validated::pinned`].
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use replay_guard::TargetValidator;
    ///
    /// # async fn example() -> Result<(), replay_guard::Error> {
    /// let validated = TargetValidator::default()
    ///     .validate("https://example.com/hook")
    ///     .await?;
    /// println!("connect to {}", validated.to_socket_addr());
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The URL is malformed or uses a forbidden scheme
    /// - The hostname is in the blocklist
    /// - DNS resolution fails, times out, or returns nothing
    /// - Any resolved IP is blocked by the policy
    pub async fn validate(&self, url: &str) -> Result<Validated, Error> {
        let target = TargetUrl::parse(url)?;

        if let Err(reason) = self.policy.check_hostname(target.host()) {
            return Err(Error::hostname_blocked(url, target.host(), reason));
        }

        let resolved = self.resolve(target.host(), target.ip_literal()).await?;

        for ip in &resolved {
            if let Err(reason) = self.policy.check_ip(*ip) {
                return Err(Error::ssrf_blocked(url, target.host(), *ip, reason.to_string()));
            }
        }

        let pinned = *resolved.first().ok_or_else(|| {
            Error::dns_error(target.host(), DnsErrorClass::Empty, "no IP addresses found")
        })?;
        debug!(host = %target.host(), %pinned, candidates = resolved.len(), "target validated");

        Ok(Validated {
            target,
            pinned,
            resolved,
        })
    }

    /// Resolve a hostname to all of its addresses. IP literals skip DNS.
    async fn resolve(&self, host: &str, literal: Option<IpAddr>) -> Result<Vec<IpAddr>, Error> {
        if let Some(ip) = literal {
            return Ok(vec![ip]);
        }

        match tokio::time::timeout(self.dns_timeout, self.resolver.lookup(host)).await {
            Ok(Ok(addrs)) => Ok(addrs),
            Ok(Err(failure)) => Err(Error::dns_error(host, failure.class, failure.message)),
            Err(_) => Err(Error::dns_error(
                host,
                DnsErrorClass::Timeout,
                format!("no answer within {}ms", self.dns_timeout.as_millis()),
            )),
        }
    }
}

//! DNS resolution for replay targets.
//!
//! Every implementation must return **all** addresses for a name (A and
//! AAAA), never just the first, because the validator checks each of them.

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use hickory_resolver::config::LookupIpStrategy;
use hickory_resolver::{ResolveError, TokioResolver};
use serde::Deserialize;
use tracing::debug;

/// Coarse class of a DNS failure, safe to put in logs and audit records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnsErrorClass {
    /// The name does not exist.
    NxDomain,
    /// The name exists but has no A/AAAA records.
    NoRecords,
    /// The lookup did not finish within the DNS timeout.
    Timeout,
    /// The resolver answered but with zero addresses.
    Empty,
    /// Anything else (no nameservers, I/O errors, malformed responses).
    LookupFailed,
}

impl fmt::Display for DnsErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NxDomain => "nxdomain",
            Self::NoRecords => "no_records",
            Self::Timeout => "timeout",
            Self::Empty => "empty",
            Self::LookupFailed => "lookup_failed",
        })
    }
}

/// A failed lookup.
#[derive(Debug, Clone)]
pub struct ResolveFailure {
    pub class: DnsErrorClass,
    pub message: String,
}

impl ResolveFailure {
    pub fn new(class: DnsErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
        }
    }
}

/// Resolves a hostname to every address it currently maps to.
#[async_trait]
pub trait Resolve: Send + Sync {
    async fn lookup(&self, host: &str) -> Result<Vec<IpAddr>, ResolveFailure>;
}

/// Which resolver the binary should use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolverKind {
    /// hickory-resolver reading the system configuration.
    #[default]
    Hickory,
    /// The platform resolver via `getaddrinfo`.
    System,
}

impl ResolverKind {
    pub fn build(self) -> Arc<dyn Resolve> {
        match self {
            Self::Hickory => Arc::new(HickoryResolver),
            Self::System => Arc::new(SystemResolver),
        }
    }
}

/// hickory-resolver backed lookups.
///
/// A fresh resolver is built for each lookup so nothing is cached between
/// replay attempts; every validation sees the name's current answer.
#[derive(Debug, Clone, Copy, Default)]
pub struct HickoryResolver;

#[async_trait]
impl Resolve for HickoryResolver {
    async fn lookup(&self, host: &str) -> Result<Vec<IpAddr>, ResolveFailure> {
        let mut builder = TokioResolver::builder_tokio()
            .map_err(|e| ResolveFailure::new(DnsErrorClass::LookupFailed, e.to_string()))?;
        // The default strategy stops after A records when any exist.
        builder.options_mut().ip_strategy = LookupIpStrategy::Ipv4AndIpv6;
        let resolver = builder.build();

        let response = resolver.lookup_ip(host).await.map_err(classify)?;
        let addrs: Vec<IpAddr> = response.iter().collect();
        debug!(host = %host, count = addrs.len(), "resolved");
        Ok(addrs)
    }
}

fn classify(e: ResolveError) -> ResolveFailure {
    let class = if e.is_nx_domain() {
        DnsErrorClass::NxDomain
    } else if e.is_no_records_found() {
        DnsErrorClass::NoRecords
    } else {
        DnsErrorClass::LookupFailed
    };
    ResolveFailure::new(class, e.to_string())
}

/// Platform resolver via `tokio::net::lookup_host`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[async_trait]
impl Resolve for SystemResolver {
    async fn lookup(&self, host: &str) -> Result<Vec<IpAddr>, ResolveFailure> {
        // lookup_host needs a port; it is discarded.
        let addrs = tokio::net::lookup_host((host, 0))
            .await
            .map_err(|e| ResolveFailure::new(DnsErrorClass::LookupFailed, e.to_string()))?;

        let mut ips: Vec<IpAddr> = Vec::new();
        for addr in addrs {
            if !ips.contains(&addr.ip()) {
                ips.push(addr.ip());
            }
        }
        debug!(host = %host, count = ips.len(), "resolved");
        Ok(ips)
    }
}

/// A fixed table of answers, in order. Unknown names are NXDOMAIN.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    answers: HashMap<String, Vec<IpAddr>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) the answer for `host`.
    pub fn with(mut self, host: &str, addrs: impl IntoIterator<Item = IpAddr>) -> Self {
        self.answers
            .insert(host.to_lowercase(), addrs.into_iter().collect());
        self
    }
}

#[async_trait]
impl Resolve for StaticResolver {
    async fn lookup(&self, host: &str) -> Result<Vec<IpAddr>, ResolveFailure> {
        self.answers
            .get(&host.to_lowercase())
            .cloned()
            .ok_or_else(|| {
                ResolveFailure::new(DnsErrorClass::NxDomain, format!("no answer for {host}"))
            })
    }
}

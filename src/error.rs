//! Error types for replay-guard.

use std::net::IpAddr;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::resolver::DnsErrorClass;

/// Errors that can occur while validating a target or replaying a request.
#[derive(Debug, Error)]
pub enum Error {
    /// A resolved (or literal) IP address falls in a blocked range.
    #[error("SSRF blocked: {host} resolved to {ip} - {reason}")]
    SsrfBlocked {
        url: String,
        host: String,
        ip: IpAddr,
        reason: String,
    },

    /// Hostname is blocked before any DNS lookup.
    #[error("SSRF blocked: {host} - {reason}")]
    HostnameBlocked { url: String, host: String, reason: String },

    /// The target could not be parsed as a URL at all.
    #[error("Malformed URL: {reason}")]
    MalformedUrl { url: String, reason: String },

    /// The URL parsed but uses a forbidden scheme, userinfo or host encoding.
    #[error("Invalid URL: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// DNS resolution failed or returned nothing.
    #[error("DNS error for {host} ({class}): {message}")]
    DnsError {
        host: String,
        class: DnsErrorClass,
        message: String,
    },

    /// Input was not an IPv4 or IPv6 address.
    #[error("not a valid IP address: {input}")]
    InvalidAddress { input: String },

    /// The outbound call exceeded the replay timeout.
    #[error("replay of {url} timed out after {}ms", .timeout.as_millis())]
    Timeout { url: String, timeout: Duration },

    /// Connection refused/reset, TLS failure, or any other transport error.
    #[error("network error: {message}")]
    Network { url: String, message: String },

    /// The captured-request store failed.
    #[error("request store error: {0}")]
    Store(String),

    /// The audit sink failed to record an event.
    #[error("audit sink error: {0}")]
    Audit(String),
}

/// Failure kinds reported for an executed (validated) replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    NetworkError,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::NetworkError => "network_error",
        }
    }
}

/// Upper bound on the length of a network error message.
const MAX_NETWORK_MESSAGE: usize = 200;

impl Error {
    pub(crate) fn ssrf_blocked(
        url: impl Into<String>,
        host: impl Into<String>,
        ip: IpAddr,
        reason: impl Into<String>,
    ) -> Self {
        Self::SsrfBlocked {
            url: url.into(),
            host: host.into(),
            ip,
            reason: reason.into(),
        }
    }

    pub(crate) fn hostname_blocked(
        url: impl Into<String>,
        host: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::HostnameBlocked {
            url: url.into(),
            host: host.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn malformed_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn dns_error(
        host: impl Into<String>,
        class: DnsErrorClass,
        message: impl Into<String>,
    ) -> Self {
        Self::DnsError {
            host: host.into(),
            class,
            message: message.into(),
        }
    }

    pub(crate) fn network(url: impl Into<String>, message: impl AsRef<str>) -> Self {
        let message: String = message.as_ref().chars().take(MAX_NETWORK_MESSAGE).collect();
        Self::Network {
            url: url.into(),
            message,
        }
    }

    /// Whether this error means the target was refused by the SSRF checks.
    pub fn is_policy_rejection(&self) -> bool {
        matches!(
            self,
            Self::SsrfBlocked { .. }
                | Self::HostnameBlocked { .. }
                | Self::InvalidUrl { .. }
                | Self::MalformedUrl { .. }
                | Self::DnsError { .. }
        )
    }

    /// The failure kind of an executed replay, if this is one.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Timeout { .. } => Some(FailureKind::Timeout),
            Self::Network { .. } => Some(FailureKind::NetworkError),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_message_is_bounded() {
        let long = "x".repeat(5_000);
        let err = Error::network("http://example.com/", &long);
        match err {
            Error::Network { message, .. } => assert_eq!(message.len(), MAX_NETWORK_MESSAGE),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_failure_kinds() {
        let timeout = Error::Timeout {
            url: "http://example.com/".into(),
            timeout: Duration::from_secs(10),
        };
        assert_eq!(timeout.failure_kind(), Some(FailureKind::Timeout));
        assert_eq!(
            Error::network("http://example.com/", "reset").failure_kind(),
            Some(FailureKind::NetworkError)
        );
        assert_eq!(Error::Store("down".into()).failure_kind(), None);
    }

    #[test]
    fn test_policy_rejection_classification() {
        assert!(Error::invalid_url("ftp://x", "scheme").is_policy_rejection());
        assert!(Error::dns_error("x", DnsErrorClass::NxDomain, "nope").is_policy_rejection());
        assert!(!Error::network("http://x/", "reset").is_policy_rejection());
    }

    #[test]
    fn test_timeout_display() {
        let err = Error::Timeout {
            url: "http://example.com/".into(),
            timeout: Duration::from_millis(1500),
        };
        assert_eq!(err.to_string(), "replay of http://example.com/ timed out after 1500ms");
    }
}

//! Target URL parsing and normalization.

use std::net::IpAddr;

use url::Url;

use crate::Error;

/// A parsed and normalized replay target.
///
/// This is the URL after parsing and the static checks, but before DNS
/// resolution and IP validation. Use [`TargetValidator`](crate::TargetValidator)
/// for the full validation including DNS resolution.
#[derive(Debug, Clone)]
pub struct TargetUrl {
    inner: Url,
    host: String,
}

impl TargetUrl {
    /// Parse and normalize a URL string.
    ///
    /// Checks, in order:
    /// - the string parses as a URL with a host
    /// - the scheme is `http` or `https`
    /// - there is no userinfo (`user:pass@`)
    /// - the host is not a non-standard IPv4 encoding (octal, decimal, hex, short-form)
    ///
    /// The hostname is lowercased and a trailing dot is removed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedUrl`] if the string is not a URL with a host,
    /// and [`Error::InvalidUrl`] for the other checks.
    pub fn parse(input: &str) -> Result<Self, Error> {
        let url = Url::parse(input.trim()).map_err(|e| Error::malformed_url(input, e.to_string()))?;

        match url.scheme() {
            "http" | "https" => {}
            scheme => {
                return Err(Error::invalid_url(
                    input,
                    format!("scheme '{}' not allowed, only http/https", scheme),
                ));
            }
        }

        let host = url
            .host_str()
            .ok_or_else(|| Error::malformed_url(input, "URL must have a host"))?;

        if !url.username().is_empty() || url.password().is_some() {
            return Err(Error::invalid_url(input, "userinfo (user:pass@) not allowed"));
        }

        // Url has already turned 0177.0.0.1 into 127.0.0.1; check what was typed.
        reject_legacy_ipv4(input)?;

        let normalized_host = normalize_host(host, input)?;

        Ok(Self {
            inner: url,
            host: normalized_host,
        })
    }

    /// Get the normalized hostname. IPv6 literals keep their brackets.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The host as an IP address, if it is an IP literal.
    pub fn ip_literal(&self) -> Option<IpAddr> {
        self.host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse()
            .ok()
    }

    /// Get the port, defaulting to 80 for http and 443 for https.
    pub fn port(&self) -> u16 {
        self.inner.port_or_known_default().unwrap_or(80)
    }

    /// Get the path.
    pub fn path(&self) -> &str {
        self.inner.path()
    }

    /// Hostname followed by path, as used in audit records.
    pub fn host_and_path(&self) -> String {
        format!("{}{}", self.host, self.inner.path())
    }

    /// Get the full URL as a string.
    pub fn as_str(&self) -> &str {
        self.inner.as_str()
    }

    /// Check if the URL uses HTTPS.
    pub fn is_https(&self) -> bool {
        self.inner.scheme() == "https"
    }

    /// Get the underlying URL.
    pub fn url(&self) -> &Url {
        &self.inner
    }
}

/// Lowercase `host` and drop one trailing dot.
pub(crate) fn canonical_host(host: &str) -> String {
    let lower = host.to_lowercase();
    match lower.strip_suffix('.') {
        Some(stripped) => stripped.to_string(),
        None => lower,
    }
}

fn normalize_host(host: &str, original_url: &str) -> Result<String, Error> {
    let normalized = canonical_host(host);

    if normalized.is_empty() {
        return Err(Error::malformed_url(original_url, "empty hostname"));
    }

    if let Some(bracketed) = normalized.strip_prefix('[') {
        let is_v6 = bracketed
            .strip_suffix(']')
            .is_some_and(|inner| inner.parse::<std::net::Ipv6Addr>().is_ok());
        if !is_v6 {
            return Err(Error::invalid_url(
                original_url,
                "brackets only allowed for IPv6 addresses",
            ));
        }
    }

    Ok(normalized)
}

/// IPv4 spellings that `Url` accepts and silently rewrites to a dotted quad.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LegacyIpv4 {
    Hex,
    Decimal,
    ShortForm,
    Octal,
}

impl LegacyIpv4 {
    fn label(self) -> &'static str {
        match self {
            Self::Hex => "hexadecimal",
            Self::Decimal => "decimal",
            Self::ShortForm => "short-form",
            Self::Octal => "octal",
        }
    }

    /// Classify a lowercased host as typed. Names and IPv6 literals give `None`.
    fn classify(host: &str) -> Option<Self> {
        if host.is_empty() || host.starts_with('[') {
            return None;
        }
        let labels: Vec<&str> = host.split('.').collect();
        let numeric =
            |label: &&str| !label.is_empty() && label.bytes().all(|b| b.is_ascii_digit());

        if labels.iter().any(|label| label.starts_with("0x")) {
            return Some(Self::Hex);
        }
        match labels.as_slice() {
            [single] if numeric(single) => Some(Self::Decimal),
            [single] if is_bare_hex(single) => Some(Self::Hex),
            [_, _] | [_, _, _] if labels.iter().all(numeric) => Some(Self::ShortForm),
            [_, _, _, _]
                if labels.iter().all(numeric)
                    && labels.iter().any(|label| label.len() > 1 && label.starts_with('0')) =>
            {
                Some(Self::Octal)
            }
            _ => None,
        }
    }
}

/// `7f000001`: all hex digits with at least one letter and one digit.
fn is_bare_hex(label: &str) -> bool {
    label.bytes().all(|b| b.is_ascii_hexdigit())
        && label.bytes().any(|b| b.is_ascii_alphabetic())
        && label.bytes().any(|b| b.is_ascii_digit())
}

/// The host of an http(s) URL exactly as typed, lowercased, without port or
/// trailing dot. Bracketed hosts come back as-is.
fn typed_host(input: &str) -> Option<String> {
    let lower = input.trim().to_ascii_lowercase();
    let rest = lower
        .strip_prefix("http://")
        .or_else(|| lower.strip_prefix("https://"))?;
    let authority = rest.split(['/', '\\', '?', '#']).next().unwrap_or_default();
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
    let host = if host_port.starts_with('[') {
        host_port
    } else {
        host_port.rsplit_once(':').map_or(host_port, |(host, _)| host)
    };
    Some(host.trim_end_matches('.').to_string())
}

fn reject_legacy_ipv4(input: &str) -> Result<(), Error> {
    match typed_host(input).as_deref().and_then(LegacyIpv4::classify) {
        Some(form) => Err(Error::invalid_url(
            input,
            format!("{} IP encoding not allowed", form.label()),
        )),
        None => Ok(()),
    }
}

//! Replaying a captured request against a validated, pinned target.
//!
//! The executor never resolves the target hostname itself. The client is
//! built with a resolve override that maps the original hostname to the
//! pinned address, so the socket goes to the address the validator vetted
//! while `Host` and TLS SNI still carry the original name.

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::redirect::Policy as RedirectPolicy;
use reqwest::{Client, Response};
use tracing::{debug, instrument};

use crate::error::Error;
use crate::request::{CapturedHeaders, CapturedRequest};
use crate::target_url::TargetUrl;
use crate::validate::Validated;

/// Wall-clock bound on one replay: connect, send and body read together.
pub const DEFAULT_REPLAY_TIMEOUT: Duration = Duration::from_secs(10);

/// Response bodies are cut to this many bytes.
pub const MAX_RESPONSE_BODY: usize = 100 * 1024;

/// Appended to a body that was cut.
pub const TRUNCATION_MARKER: &str = "\n...[truncated]";

/// Captured headers that are never forwarded: hop-by-hop headers, proxy and
/// CDN identity headers, and framing the client recomputes.
pub const STRIPPED_HEADERS: &[&str] = &[
    "host",
    "connection",
    "keep-alive",
    "transfer-encoding",
    "te",
    "trailer",
    "upgrade",
    "proxy-authorization",
    "proxy-connection",
    "x-forwarded-for",
    "x-forwarded-host",
    "x-forwarded-proto",
    "x-real-ip",
    "cf-connecting-ip",
    "cf-ray",
    "cf-visitor",
    "cdn-loop",
    "content-length",
];

/// What the target answered.
#[derive(Debug, Clone)]
pub struct ReplayResponse {
    pub status: u16,
    /// Lowercase header names; repeated headers joined with `", "`.
    pub headers: BTreeMap<String, String>,
    pub body: Bytes,
    /// Whether `body` was cut at [`MAX_RESPONSE_BODY`] and marked.
    pub truncated: bool,
}

/// Sends captured requests to pinned targets.
///
/// Stateless apart from its limits; a new HTTP client is built per replay so
/// no connection is ever reused across different pins.
#[derive(Debug, Clone)]
pub struct ReplayExecutor {
    timeout: Duration,
    max_body: usize,
}

impl Default for ReplayExecutor {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_REPLAY_TIMEOUT,
            max_body: MAX_RESPONSE_BODY,
        }
    }
}

impl ReplayExecutor {
    pub fn new(timeout: Duration, max_body: usize) -> Self {
        Self { timeout, max_body }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Replay against the output of [`TargetValidator::validate`](crate::TargetValidator::validate).
    pub async fn execute_validated(
        &self,
        request: &CapturedRequest,
        validated: &Validated,
    ) -> Result<ReplayResponse, Error> {
        self.execute(request, &validated.target, validated.pinned).await
    }

    /// Replay `request` to `target`, connecting only to `pinned`.
    ///
    /// Redirects are returned as-is, never followed.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] if the exchange takes longer than the timeout. The
    ///   in-flight request is dropped, which closes its socket.
    /// - [`Error::Network`] for connection, TLS and protocol failures.
    #[instrument(
        skip_all,
        fields(method = %request.method, host = %target.host(), pinned = %pinned)
    )]
    pub async fn execute(
        &self,
        request: &CapturedRequest,
        target: &TargetUrl,
        pinned: IpAddr,
    ) -> Result<ReplayResponse, Error> {
        let url = target.as_str();
        let client =
            pinned_client(target, pinned).map_err(|e| Error::network(url, error_chain(&e)))?;

        let mut outbound = client
            .request(request.method.to_reqwest(), target.url().clone())
            .headers(outbound_headers(&request.headers));
        if request.method.sends_body() {
            if let Some(body) = &request.body {
                outbound = outbound.body(body.clone());
            }
        }

        let exchange = async {
            let response = outbound.send().await.map_err(|e| self.classify(url, &e))?;
            self.read_response(url, response).await
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => {
                if let Ok(response) = &result {
                    debug!(
                        status = response.status,
                        truncated = response.truncated,
                        "replay answered"
                    );
                }
                result
            }
            Err(_) => Err(Error::Timeout {
                url: url.to_string(),
                timeout: self.timeout,
            }),
        }
    }

    async fn read_response(&self, url: &str, response: Response) -> Result<ReplayResponse, Error> {
        let status = response.status().as_u16();
        let headers = flatten_headers(response.headers());

        let mut body = BytesMut::new();
        let mut truncated = false;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| self.classify(url, &e))?;
            let remaining = self.max_body - body.len();
            if chunk.len() > remaining {
                body.extend_from_slice(&chunk[..remaining]);
                truncated = true;
                break;
            }
            body.extend_from_slice(&chunk);
        }
        if truncated {
            body.extend_from_slice(TRUNCATION_MARKER.as_bytes());
        }

        Ok(ReplayResponse {
            status,
            headers,
            body: body.freeze(),
            truncated,
        })
    }

    fn classify(&self, url: &str, e: &reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::Timeout {
                url: url.to_string(),
                timeout: self.timeout,
            }
        } else {
            Error::network(url, error_chain(e))
        }
    }
}

/// Client that sends `target`'s hostname to `pinned` and nowhere else.
fn pinned_client(target: &TargetUrl, pinned: IpAddr) -> reqwest::Result<Client> {
    let mut builder = Client::builder()
        .redirect(RedirectPolicy::none())
        // An environment proxy would do its own DNS and defeat the pin.
        .no_proxy();
    // The override is keyed on the host exactly as it appears in the request
    // URL (trailing dot included), not on the normalized name.
    if let (None, Some(host)) = (target.ip_literal(), target.url().host_str()) {
        builder = builder.resolve(host, SocketAddr::new(pinned, target.port()));
    }
    builder.build()
}

/// Captured headers minus the stripped set. `Host` comes from the target URL.
fn outbound_headers(captured: &CapturedHeaders) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(captured.len());
    for (name, value) in captured.iter() {
        if is_stripped(name) {
            continue;
        }
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => debug!(header = %name, "skipping header that is not valid HTTP"),
        }
    }
    headers
}

fn is_stripped(name: &str) -> bool {
    STRIPPED_HEADERS
        .iter()
        .any(|stripped| stripped.eq_ignore_ascii_case(name))
}

fn flatten_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut flat: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes());
        flat.entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert_with(|| value.into_owned());
    }
    flat
}

/// `Display` of an error followed by its sources.
fn error_chain(e: &(dyn std::error::Error + 'static)) -> String {
    let mut message = e.to_string();
    let mut source = e.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}

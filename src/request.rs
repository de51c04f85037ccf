//! Captured requests, as handed over by the ingestion pipeline.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Deserializer};
use uuid::Uuid;

/// Methods a captured request can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReplayMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl ReplayMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
        }
    }

    /// GET and HEAD never carry a body on replay, whatever was captured.
    pub fn sends_body(self) -> bool {
        !matches!(self, Self::Get | Self::Head)
    }

    pub(crate) fn to_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Put => reqwest::Method::PUT,
            Self::Patch => reqwest::Method::PATCH,
            Self::Delete => reqwest::Method::DELETE,
            Self::Head => reqwest::Method::HEAD,
            Self::Options => reqwest::Method::OPTIONS,
        }
    }
}

impl fmt::Display for ReplayMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReplayMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            "HEAD" => Ok(Self::Head),
            "OPTIONS" => Ok(Self::Options),
            other => Err(format!("unsupported method: {other}")),
        }
    }
}

/// Header map with case-insensitive names. Insertion order is kept; a
/// second insert of the same name (any case) replaces the first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "BTreeMap<String, String>")]
pub struct CapturedHeaders {
    entries: Vec<(String, String)>,
}

impl CapturedHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self
            .entries
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(&name))
        {
            Some(entry) => *entry = (name, value),
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for CapturedHeaders {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Self::new();
        for (k, v) in iter {
            headers.insert(k, v);
        }
        headers
    }
}

impl From<BTreeMap<String, String>> for CapturedHeaders {
    fn from(map: BTreeMap<String, String>) -> Self {
        map.into_iter().collect()
    }
}

/// A previously captured inbound request. Immutable once built.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedRequest {
    pub id: Uuid,
    /// The user the capture belongs to.
    pub owner_id: String,
    pub method: ReplayMethod,
    #[serde(default)]
    pub headers: CapturedHeaders,
    #[serde(default, deserialize_with = "body_from_text")]
    pub body: Option<Bytes>,
}

impl CapturedRequest {
    pub fn new(owner_id: impl Into<String>, method: ReplayMethod) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id: owner_id.into(),
            method,
            headers: CapturedHeaders::new(),
            body: None,
        }
    }

    pub fn with_headers(mut self, headers: CapturedHeaders) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }
}

fn body_from_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Bytes>, D::Error> {
    let text: Option<String> = Option::deserialize(deserializer)?;
    Ok(text.map(Bytes::from))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_case_insensitive() {
        let mut headers = CapturedHeaders::new();
        headers.insert("X-Custom", "a");
        headers.insert("x-custom", "b");
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("X-CUSTOM"), Some("b"));
        assert_eq!(headers.get("missing"), None);
    }

    #[test]
    fn test_method_body_semantics() {
        assert!(!ReplayMethod::Get.sends_body());
        assert!(!ReplayMethod::Head.sends_body());
        for m in [
            ReplayMethod::Post,
            ReplayMethod::Put,
            ReplayMethod::Patch,
            ReplayMethod::Delete,
            ReplayMethod::Options,
        ] {
            assert!(m.sends_body(), "{m}");
        }
    }

    #[test]
    fn test_method_parse() {
        assert_eq!("patch".parse::<ReplayMethod>().unwrap(), ReplayMethod::Patch);
        assert!("TRACE".parse::<ReplayMethod>().is_err());
    }

    #[test]
    fn test_deserialize_captured_request() {
        let json = r#"{
            "id": "6f1c2a43-9a0e-4d67-8f55-2b1f8a8c9e01",
            "ownerId": "user-1",
            "method": "POST",
            "headers": {"Content-Type": "application/json", "X-Signature": "abc"},
            "body": "{\"ok\":true}"
        }"#;
        let req: CapturedRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.owner_id, "user-1");
        assert_eq!(req.method, ReplayMethod::Post);
        assert_eq!(req.headers.get("content-type"), Some("application/json"));
        assert_eq!(req.body.as_deref(), Some(&b"{\"ok\":true}"[..]));
    }

    #[test]
    fn test_deserialize_without_body_or_headers() {
        let json = r#"{"id": "6f1c2a43-9a0e-4d67-8f55-2b1f8a8c9e01", "ownerId": "u", "method": "GET"}"#;
        let req: CapturedRequest = serde_json::from_str(json).unwrap();
        assert!(req.headers.is_empty());
        assert!(req.body.is_none());
    }
}

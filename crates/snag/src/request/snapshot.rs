//! Immutable snapshot of an outgoing request as seen by matchers and hooks.

use super::url::{parse_query_string, PageUrl};
use crate::error::{BodyParseError, ConfigError, InterceptError};
use crate::transport::OutgoingRequest;
use chrono::{DateTime, Utc};
use hyper::Uri;
use once_cell::unsync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Category of network activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Fetch,
    Xhr,
    Document,
    Script,
    Stylesheet,
    Image,
    Font,
    Media,
    Other,
}

impl ResourceType {
    pub const ALL: [ResourceType; 9] = [
        ResourceType::Fetch,
        ResourceType::Xhr,
        ResourceType::Document,
        ResourceType::Script,
        ResourceType::Stylesheet,
        ResourceType::Image,
        ResourceType::Font,
        ResourceType::Media,
        ResourceType::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Fetch => "fetch",
            ResourceType::Xhr => "xhr",
            ResourceType::Document => "document",
            ResourceType::Script => "script",
            ResourceType::Stylesheet => "stylesheet",
            ResourceType::Image => "image",
            ResourceType::Font => "font",
            ResourceType::Media => "media",
            ResourceType::Other => "other",
        }
    }
}

impl FromStr for ResourceType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceType::ALL
            .into_iter()
            .find(|rt| rt.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ConfigError::UnknownResourceType(s.to_string()))
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request snapshot taken when a call starts.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSnapshot {
    /// Upper-cased HTTP method
    pub method: String,
    /// Absolute URL
    pub url: String,
    /// Request headers, keys lower-cased
    pub headers: HashMap<String, String>,
    /// Decoded query parameters
    pub query: HashMap<String, String>,
    /// Raw body text (empty when the request had no body)
    pub body: String,
    pub resource_type: ResourceType,
    /// Origin differs from the hosting page's origin
    pub cross_domain: bool,
    /// Request goes over https
    pub https: bool,
    pub started_at: DateTime<Utc>,
}

impl RequestSnapshot {
    /// Resolve `request` against `page` and snapshot it.
    pub fn from_request(
        page: &PageUrl,
        request: &OutgoingRequest,
        resource_type: ResourceType,
    ) -> Result<Self, InterceptError> {
        let uri = page.resolve(&request.url)?;
        Ok(Self::capture(page, &uri, request, resource_type))
    }

    pub(crate) fn capture(
        page: &PageUrl,
        uri: &Uri,
        request: &OutgoingRequest,
        resource_type: ResourceType,
    ) -> Self {
        let headers = request
            .headers
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
            .collect();
        let body = request
            .body
            .as_ref()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_default();

        Self {
            method: request.method.to_ascii_uppercase(),
            url: uri.to_string(),
            headers,
            query: parse_query_string(uri.query()),
            body,
            resource_type,
            cross_domain: page.is_cross_domain(uri),
            https: uri
                .scheme_str()
                .is_some_and(|s| s.eq_ignore_ascii_case("https")),
            started_at: Utc::now(),
        }
    }

    /// Look up a header case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// URL without query string or fragment.
    pub fn url_without_query(&self) -> &str {
        let end = self.url.find(['?', '#']).unwrap_or(self.url.len());
        &self.url[..end]
    }

    /// Deferred accessor over the structured request body.
    pub fn lazy_body(&self) -> LazyBody<'_> {
        LazyBody::new(&self.body, self.header("content-type"))
    }
}

/// Parses the request body on first access and caches the outcome.
///
/// A malformed body is not an error until [`LazyBody::get`] is called.
pub struct LazyBody<'a> {
    raw: &'a str,
    content_type: Option<&'a str>,
    parsed: OnceCell<Result<serde_json::Value, BodyParseError>>,
}

impl<'a> LazyBody<'a> {
    pub fn new(raw: &'a str, content_type: Option<&'a str>) -> Self {
        Self {
            raw,
            content_type,
            parsed: OnceCell::new(),
        }
    }

    pub fn raw(&self) -> &str {
        self.raw
    }

    /// Structured body: form fields as a JSON object for url-encoded bodies,
    /// JSON otherwise, `null` for an empty body.
    pub fn get(&self) -> Result<&serde_json::Value, BodyParseError> {
        self.parsed
            .get_or_init(|| parse_body(self.raw, self.content_type))
            .as_ref()
            .map_err(Clone::clone)
    }
}

impl fmt::Debug for LazyBody<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyBody")
            .field("raw_len", &self.raw.len())
            .field("content_type", &self.content_type)
            .field("parsed", &self.parsed.get().is_some())
            .finish()
    }
}

fn parse_body(
    raw: &str,
    content_type: Option<&str>,
) -> Result<serde_json::Value, BodyParseError> {
    let is_form = content_type
        .map(|ct| ct.contains("application/x-www-form-urlencoded"))
        .unwrap_or(false);

    if is_form {
        let fields = parse_query_string(Some(raw))
            .into_iter()
            .map(|(k, v)| (k, serde_json::Value::String(v)))
            .collect();
        return Ok(serde_json::Value::Object(fields));
    }

    if raw.trim().is_empty() {
        return Ok(serde_json::Value::Null);
    }

    serde_json::from_str(raw).map_err(|e| BodyParseError {
        format: "JSON",
        reason: e.to_string(),
    })
}

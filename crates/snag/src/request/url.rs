//! URL handling relative to the hosting page.

use crate::error::{ConfigError, InterceptError};
use hyper::Uri;
use std::collections::HashMap;

/// Scheme, host and port triple used for same-origin checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

impl Origin {
    /// Origin of an absolute URI, `None` for relative ones.
    pub fn of(uri: &Uri) -> Option<Self> {
        let scheme = uri.scheme_str()?.to_ascii_lowercase();
        let host = uri.host()?.to_ascii_lowercase();
        let port = uri.port_u16().unwrap_or_else(|| default_port(&scheme));
        Some(Self { scheme, host, port })
    }
}

fn default_port(scheme: &str) -> u16 {
    match scheme {
        "https" | "wss" => 443,
        _ => 80,
    }
}

/// The URL of the page hosting the intercepted calls.
///
/// Relative request URLs are resolved against it and cross-domain flags are
/// derived from its origin.
#[derive(Debug, Clone)]
pub struct PageUrl {
    uri: Uri,
    origin: Origin,
}

impl PageUrl {
    pub fn parse(url: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidPageUrl {
            url: url.to_string(),
            reason: reason.to_string(),
        };
        let uri: Uri = url.trim().parse().map_err(|_| invalid("not a valid URI"))?;
        let origin = Origin::of(&uri).ok_or_else(|| invalid("must be absolute"))?;
        Ok(Self { uri, origin })
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn as_str(&self) -> String {
        self.uri.to_string()
    }

    /// Resolve a possibly relative request URL into an absolute URI.
    pub fn resolve(&self, raw: &str) -> Result<Uri, InterceptError> {
        let raw = raw.trim();
        let prefix = match self.uri.authority() {
            Some(authority) => format!("{}://{}", self.origin.scheme, authority),
            None => format!("{}://{}", self.origin.scheme, self.origin.host),
        };

        let candidate = if raw.contains("://") {
            raw.to_string()
        } else if let Some(rest) = raw.strip_prefix("//") {
            format!("{}://{}", self.origin.scheme, rest)
        } else if raw.starts_with('/') {
            format!("{prefix}{raw}")
        } else if raw.starts_with('?') {
            format!("{prefix}{}{raw}", self.uri.path())
        } else {
            let path = self.uri.path();
            let dir = match path.rfind('/') {
                Some(idx) => &path[..=idx],
                None => "/",
            };
            format!("{prefix}{dir}{raw}")
        };

        let uri: Uri = candidate
            .parse()
            .map_err(|e| InterceptError::InvalidRequest(format!("{raw}: {e}")))?;
        if uri.scheme().is_none() || uri.authority().is_none() {
            return Err(InterceptError::InvalidRequest(format!(
                "{raw}: could not resolve to an absolute URL"
            )));
        }
        Ok(uri)
    }

    /// Whether a request to `uri` leaves the page's origin.
    pub fn is_cross_domain(&self, uri: &Uri) -> bool {
        Origin::of(uri).map_or(true, |origin| origin != self.origin)
    }
}

/// Parse a raw query string into a decoded key/value map.
///
/// Repeated keys keep the last value.
pub fn parse_query_string(query: Option<&str>) -> HashMap<String, String> {
    let mut params = HashMap::new();
    if let Some(q) = query {
        for pair in q.split('&') {
            if let Some((key, value)) = pair.split_once('=') {
                params.insert(decode(key), decode(value));
            } else if !pair.is_empty() {
                params.insert(decode(pair), String::new());
            }
        }
    }
    params
}

fn decode(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|s| s.into_owned())
        .unwrap_or(spaced)
}

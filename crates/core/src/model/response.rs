//! Fetched content plus the cache metadata computed for it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Error;
use crate::cache::freshness::{self, CacheInput, Reason};
use crate::model::{FetcherKind, HeaderSnapshot};

/// A cookie carried between requests of the same user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
    pub name: String,
    pub value: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// RFC 3339 expiry, if the cookie is persistent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<String>,

    #[serde(default)]
    pub http_only: bool,

    #[serde(default)]
    pub secure: bool,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { name: name.into(), value: value.into(), ..Default::default() }
    }

    /// Render as a `Set-Cookie` header value.
    pub fn to_set_cookie(&self) -> String {
        let mut out = format!("{}={}", self.name, self.value);
        if let Some(domain) = &self.domain {
            out.push_str(&format!("; Domain={domain}"));
        }
        if let Some(path) = &self.path {
            out.push_str(&format!("; Path={path}"));
        }
        if let Some(expires) = self.expires.as_deref().and_then(|e| DateTime::parse_from_rfc3339(e).ok()) {
            out.push_str(&format!("; Expires={}", expires.with_timezone(&Utc).format("%a, %d %b %Y %H:%M:%S GMT")));
        }
        if self.secure {
            out.push_str("; Secure");
        }
        if self.http_only {
            out.push_str("; HttpOnly");
        }
        out
    }
}

/// Fetched content with protocol and cache metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchResponse {
    pub fetcher: FetcherKind,

    /// Final URL after redirects.
    pub url: String,

    /// Method actually sent to the origin.
    pub method: String,

    /// Document body, normalized to UTF-8.
    pub html: String,

    pub status_code: u16,
    pub status: String,

    /// Instant after which a cached copy must be re-fetched.
    pub expires: DateTime<Utc>,

    /// Why the response may not be cached. Empty means cacheable.
    #[serde(default)]
    pub reasons_not_cacheable: Vec<Reason>,

    #[serde(default)]
    pub request_headers: HeaderSnapshot,

    #[serde(default)]
    pub response_headers: HeaderSnapshot,

    #[serde(default)]
    pub cookies: Vec<Cookie>,
}

impl FetchResponse {
    /// A response whose cache metadata has not been computed yet.
    pub fn new(fetcher: FetcherKind, url: impl Into<String>, status_code: u16, html: impl Into<String>) -> Self {
        Self {
            fetcher,
            url: url.into(),
            method: "GET".into(),
            html: html.into(),
            status_code,
            status: status_text(status_code).to_string(),
            expires: Utc::now(),
            reasons_not_cacheable: Vec::new(),
            request_headers: HeaderSnapshot::new(),
            response_headers: HeaderSnapshot::new(),
            cookies: Vec::new(),
        }
    }

    /// Evaluate HTTP caching rules against the header snapshots and record
    /// the outcome. A non-empty reason list pins `expires` to `now`.
    pub fn set_cache_info(&mut self, now: DateTime<Utc>) {
        let freshness = freshness::evaluate(&CacheInput {
            method: &self.method,
            request_headers: &self.request_headers,
            status: self.status_code,
            response_headers: &self.response_headers,
            now,
        });
        self.expires = freshness.expires;
        self.reasons_not_cacheable = freshness.reasons;
    }

    pub fn is_cacheable(&self) -> bool {
        self.reasons_not_cacheable.is_empty()
    }

    /// True while `now` is before the computed expiry.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires > now
    }

    pub fn is_not_found(&self) -> bool {
        self.status_code == 404
    }

    /// Fail with `NotFound` for 404 responses, cached or fresh.
    pub fn ensure_found(self) -> Result<Self, Error> {
        if self.is_not_found() {
            return Err(Error::NotFound(self.url));
        }
        Ok(self)
    }

    /// Serialized form written to storage.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Canonical reason phrase for common status codes.
pub fn status_text(code: u16) -> &'static str {
    match code {
        200 => "OK",
        201 => "Created",
        203 => "Non-Authoritative Information",
        204 => "No Content",
        206 => "Partial Content",
        300 => "Multiple Choices",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        410 => "Gone",
        414 => "URI Too Long",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample() -> FetchResponse {
        let mut resp = FetchResponse::new(FetcherKind::Base, "http://example.com", 200, "<html>hi</html>");
        resp.response_headers.append("Cache-Control", "max-age=3600");
        resp.response_headers.append("Content-Type", "text/html; charset=utf-8");
        resp.cookies.push(Cookie::new("session", "abc"));
        resp
    }

    #[test]
    fn test_set_cache_info_cacheable() {
        let now = Utc::now();
        let mut resp = sample();
        resp.set_cache_info(now);
        assert!(resp.is_cacheable());
        assert!(resp.expires > now);
        assert!(resp.is_fresh(now));
        assert!(!resp.is_fresh(now + Duration::hours(2)));
    }

    #[test]
    fn test_set_cache_info_not_cacheable_expires_now() {
        let now = Utc::now();
        let mut resp = sample();
        resp.response_headers.insert("Cache-Control", "no-store");
        resp.set_cache_info(now);
        assert!(!resp.is_cacheable());
        assert_eq!(resp.expires, now);
        assert!(!resp.is_fresh(now));
    }

    #[test]
    fn test_serialization_round_trip_is_byte_identical() {
        let mut resp = sample();
        resp.set_cache_info(Utc::now());
        let bytes = resp.to_bytes().unwrap();
        let decoded = FetchResponse::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, resp);
        assert_eq!(decoded.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn test_ensure_found() {
        let resp = FetchResponse::new(FetcherKind::Base, "http://example.com/missing", 404, "nope");
        assert!(matches!(resp.ensure_found(), Err(Error::NotFound(url)) if url == "http://example.com/missing"));
        assert!(sample().ensure_found().is_ok());
    }

    #[test]
    fn test_cookie_to_set_cookie() {
        let cookie = Cookie {
            name: "sid".into(),
            value: "42".into(),
            domain: Some("example.com".into()),
            path: Some("/".into()),
            expires: Some("2030-01-02T03:04:05Z".into()),
            http_only: true,
            secure: true,
        };
        assert_eq!(
            cookie.to_set_cookie(),
            "sid=42; Domain=example.com; Path=/; Expires=Wed, 02 Jan 2030 03:04:05 GMT; Secure; HttpOnly"
        );
    }
}

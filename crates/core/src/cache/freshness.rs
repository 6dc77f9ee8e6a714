//! Shared-cache freshness evaluation (RFC 7234).
//!
//! [`evaluate`] decides whether a fetched response may be stored and until
//! when it stays fresh. The result obeys two rules the storage layer relies
//! on: a cacheable response always expires strictly after the evaluation
//! instant, and an uncacheable one expires exactly at it.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use super::directives::Directives;
use crate::model::HeaderSnapshot;

/// Lifetime, in seconds, used when a response carries no timing information at all.
pub const DEFAULT_LIFETIME_SECS: i64 = 24 * 60 * 60;

/// Statuses a shared cache may store without explicit freshness.
const CACHEABLE_BY_DEFAULT: [u16; 11] = [200, 203, 204, 206, 300, 301, 404, 405, 410, 414, 501];

/// Why a response must not be served from cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Reason {
    /// Request method other than GET/HEAD, or POST without explicit freshness.
    RequestMethod,
    RequestNoStore,
    ResponseNoStore,
    /// Stored responses would need revalidation on every use.
    ResponseNoCache,
    /// `private` responses are never stored by a shared cache.
    ResponsePrivate,
    /// Authorized request without `public`, `s-maxage` or `must-revalidate`.
    AuthorizationHeader,
    /// Status not cacheable by default and no explicit freshness given.
    UncacheableByDefault,
    VaryStar,
    /// Computed expiry is not after the evaluation instant.
    ExpiredOnArrival,
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Reason::RequestMethod => "request method is not cacheable",
            Reason::RequestNoStore => "request has cache-control: no-store",
            Reason::ResponseNoStore => "response has cache-control: no-store",
            Reason::ResponseNoCache => "response has cache-control: no-cache",
            Reason::ResponsePrivate => "response has cache-control: private",
            Reason::AuthorizationHeader => "request has an authorization header",
            Reason::UncacheableByDefault => "status is not cacheable by default",
            Reason::VaryStar => "response has vary: *",
            Reason::ExpiredOnArrival => "response expired on arrival",
        };
        f.write_str(text)
    }
}

/// Everything the evaluator looks at.
#[derive(Debug, Clone, Copy)]
pub struct CacheInput<'a> {
    pub method: &'a str,
    pub request_headers: &'a HeaderSnapshot,
    pub status: u16,
    pub response_headers: &'a HeaderSnapshot,
    pub now: DateTime<Utc>,
}

/// Outcome of an evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Freshness {
    pub reasons: Vec<Reason>,
    pub expires: DateTime<Utc>,
}

impl Freshness {
    pub fn is_cacheable(&self) -> bool {
        self.reasons.is_empty()
    }
}

/// Evaluate cacheability and expiry for one exchange.
pub fn evaluate(input: &CacheInput<'_>) -> Freshness {
    let (req_cc, req_errors) = Directives::parse(input.request_headers.get_all("cache-control").iter().map(String::as_str));
    let (resp_cc, resp_errors) =
        Directives::parse(input.response_headers.get_all("cache-control").iter().map(String::as_str));
    for err in req_errors.iter().chain(&resp_errors) {
        tracing::debug!(error = %err, "ignoring malformed cache-control directive");
    }

    let date = header_date(input.response_headers, "date");
    let expires_header = input.response_headers.get("expires");
    let explicit = resp_cc.has_explicit_lifetime() || expires_header.is_some();

    let mut reasons = Vec::new();
    match input.method.to_ascii_uppercase().as_str() {
        "GET" | "HEAD" => {}
        "POST" if explicit => {}
        _ => reasons.push(Reason::RequestMethod),
    }
    if req_cc.no_store {
        reasons.push(Reason::RequestNoStore);
    }
    if resp_cc.no_store {
        reasons.push(Reason::ResponseNoStore);
    }
    if resp_cc.no_cache {
        reasons.push(Reason::ResponseNoCache);
    }
    if resp_cc.private {
        reasons.push(Reason::ResponsePrivate);
    }
    if input.request_headers.contains("authorization")
        && !(resp_cc.public || resp_cc.s_maxage.is_some() || resp_cc.must_revalidate)
    {
        reasons.push(Reason::AuthorizationHeader);
    }
    if !explicit && !CACHEABLE_BY_DEFAULT.contains(&input.status) {
        reasons.push(Reason::UncacheableByDefault);
    }
    if input.response_headers.get_all("vary").iter().any(|v| v.split(',').any(|f| f.trim() == "*")) {
        reasons.push(Reason::VaryStar);
    }

    if !reasons.is_empty() {
        return Freshness { reasons, expires: input.now };
    }

    let expires = expiration(input, &resp_cc, date.unwrap_or(input.now), expires_header);
    if expires <= input.now {
        return Freshness { reasons: vec![Reason::ExpiredOnArrival], expires: input.now };
    }
    Freshness { reasons, expires }
}

/// Expiration precedence: `s-maxage`, `max-age`, `Expires`, then the
/// Last-Modified heuristic, then [`DEFAULT_LIFETIME_SECS`].
fn expiration(
    input: &CacheInput<'_>, cc: &Directives, date: DateTime<Utc>, expires_header: Option<&str>,
) -> DateTime<Utc> {
    if let Some(age) = cc.s_maxage.or(cc.max_age) {
        // Directive ages saturate at 2^31 seconds, so this cannot overflow.
        return date + Duration::seconds(age.as_secs() as i64);
    }

    if let Some(raw) = expires_header {
        // An unparseable Expires (e.g. "0") means already expired.
        return match parse_http_date(raw) {
            Some(at) => at,
            None => {
                tracing::debug!(expires = raw, "invalid expires header, treating as expired");
                input.now
            }
        };
    }

    if CACHEABLE_BY_DEFAULT.contains(&input.status)
        && let Some(last_modified) = header_date(input.response_headers, "last-modified")
        && last_modified < date
    {
        return input.now + (date - last_modified) / 10;
    }

    input.now + Duration::seconds(DEFAULT_LIFETIME_SECS)
}

fn header_date(headers: &HeaderSnapshot, name: &str) -> Option<DateTime<Utc>> {
    let raw = headers.get(name)?;
    let parsed = parse_http_date(raw);
    if parsed.is_none() {
        tracing::debug!(header = name, value = raw, "ignoring unparseable date header");
    }
    parsed
}

/// Parse an HTTP date in IMF-fixdate, RFC 850 or asctime form.
pub fn parse_http_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%A, %d-%b-%y %H:%M:%S GMT") {
        return Some(naive.and_utc());
    }
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    NaiveDateTime::parse_from_str(&collapsed, "%a %b %e %H:%M:%S %Y").ok().map(|naive| naive.and_utc())
}

/// Format an instant as an IMF-fixdate, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`.
pub fn format_http_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

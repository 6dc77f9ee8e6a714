//! Cookie handling on top of the `cookie` and `cookie_store` crates.
//!
//! Fetchers exchange plain [`Cookie`] values. Per-user state lives in a
//! [`CookieStore`], which applies the RFC 6265 domain, path and expiry
//! rules when cookies are stored and when they are matched to a request.

use chrono::{DateTime, Utc};
use cookie::time::OffsetDateTime;
use cookie_store::{CookieStore, RawCookie};
use trawl_core::Cookie;
use url::Url;

/// Longest lifetime accepted from `Max-Age`, in seconds.
const MAX_AGE_CAP: i64 = 400 * 86_400;

/// Parse one `Set-Cookie` value. Returns `None` for values without a
/// `name=value` pair. `Max-Age` wins over `Expires`.
pub fn parse_set_cookie(raw: &str, now: DateTime<Utc>) -> Option<Cookie> {
    let parsed = RawCookie::parse(raw).ok()?;
    let expires = match parsed.max_age() {
        Some(age) => Some(now + chrono::Duration::seconds(age.whole_seconds().clamp(0, MAX_AGE_CAP))),
        None => parsed.expires_datetime().and_then(|at| DateTime::from_timestamp(at.unix_timestamp(), 0)),
    };
    Some(Cookie {
        name: parsed.name().to_string(),
        value: parsed.value().to_string(),
        domain: parsed.domain().map(str::to_string),
        path: parsed.path().map(str::to_string),
        expires: expires.map(|at| at.to_rfc3339()),
        http_only: parsed.http_only().unwrap_or(false),
        secure: parsed.secure().unwrap_or(false),
    })
}

/// Parse every `Set-Cookie` value, skipping malformed ones.
pub fn parse_all<'a>(values: impl IntoIterator<Item = &'a String>, now: DateTime<Utc>) -> Vec<Cookie> {
    values
        .into_iter()
        .filter_map(|raw| {
            let parsed = parse_set_cookie(raw, now);
            if parsed.is_none() {
                tracing::debug!(value = %raw, "ignoring malformed set-cookie");
            }
            parsed
        })
        .collect()
}

/// Render cookies as a single `Cookie` request header value.
pub fn cookie_header(cookies: &[Cookie]) -> Option<String> {
    if cookies.is_empty() {
        return None;
    }
    let pairs: Vec<String> =
        cookies.iter().map(|c| RawCookie::new(c.name.as_str(), c.value.as_str()).stripped().to_string()).collect();
    Some(pairs.join("; "))
}

fn to_raw(cookie: &Cookie) -> RawCookie<'static> {
    let mut builder =
        RawCookie::build((cookie.name.clone(), cookie.value.clone())).http_only(cookie.http_only).secure(cookie.secure);
    if let Some(domain) = &cookie.domain {
        builder = builder.domain(domain.clone());
    }
    if let Some(path) = &cookie.path {
        builder = builder.path(path.clone());
    }
    let expires = cookie
        .expires
        .as_deref()
        .and_then(|at| DateTime::parse_from_rfc3339(at).ok())
        .and_then(|at| OffsetDateTime::from_unix_timestamp(at.timestamp()).ok());
    if let Some(at) = expires {
        builder = builder.expires(at);
    }
    builder.build()
}

fn from_stored(cookie: &RawCookie<'_>) -> Cookie {
    Cookie {
        name: cookie.name().to_string(),
        value: cookie.value().to_string(),
        domain: cookie.domain().map(str::to_string),
        path: cookie.path().map(str::to_string),
        expires: cookie
            .expires_datetime()
            .and_then(|at| DateTime::from_timestamp(at.unix_timestamp(), 0))
            .map(|at| at.to_rfc3339()),
        http_only: cookie.http_only().unwrap_or(false),
        secure: cookie.secure().unwrap_or(false),
    }
}

/// Cookies to send to `url`: the stored ones that match it, overridden by
/// name with the cookies supplied on the request.
pub fn for_request(jar: &CookieStore, url: &Url, explicit: &[Cookie]) -> Vec<Cookie> {
    let mut cookies: Vec<Cookie> = jar
        .matches(url)
        .into_iter()
        .filter(|stored| explicit.iter().all(|c| c.name != stored.name()))
        .map(|stored| from_stored(stored))
        .collect();
    cookies.extend(explicit.iter().cloned());
    cookies
}

/// Record cookies received from `url`. Cookies the store rejects, such as a
/// domain that does not match `url`, are dropped.
pub fn store_response(jar: &mut CookieStore, url: &Url, cookies: &[Cookie]) {
    for cookie in cookies {
        if let Err(e) = jar.insert_raw(&to_raw(cookie), url) {
            tracing::debug!(name = %cookie.name, url = %url, error = %e, "cookie rejected");
        }
    }
}

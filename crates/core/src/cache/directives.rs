//! `Cache-Control` directive parsing.

use std::time::Duration;

/// Directives relevant to a shared cache, merged across every
/// `Cache-Control` header value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Directives {
    pub no_store: bool,
    pub no_cache: bool,
    pub private: bool,
    pub public: bool,
    pub must_revalidate: bool,
    pub proxy_revalidate: bool,
    pub max_age: Option<Duration>,
    pub s_maxage: Option<Duration>,
}

/// A directive that could not be understood.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid cache-control directive {name}: {value:?}")]
pub struct DirectiveError {
    pub name: String,
    pub value: String,
}

impl Directives {
    /// Parse every value of a `Cache-Control` header.
    ///
    /// Unknown directives are ignored. Malformed delta-seconds are reported
    /// alongside the best-effort result so callers can log them.
    pub fn parse<'a>(values: impl IntoIterator<Item = &'a str>) -> (Self, Vec<DirectiveError>) {
        let mut directives = Directives::default();
        let mut errors = Vec::new();

        for value in values {
            for token in value.split(',') {
                let token = token.trim();
                if token.is_empty() {
                    continue;
                }
                let (name, arg) = match token.split_once('=') {
                    Some((name, arg)) => (name.trim().to_ascii_lowercase(), Some(arg.trim().trim_matches('"'))),
                    None => (token.to_ascii_lowercase(), None),
                };
                match name.as_str() {
                    "no-store" => directives.no_store = true,
                    "no-cache" => directives.no_cache = true,
                    "private" => directives.private = true,
                    "public" => directives.public = true,
                    "must-revalidate" => directives.must_revalidate = true,
                    "proxy-revalidate" => directives.proxy_revalidate = true,
                    "max-age" | "s-maxage" => match arg.and_then(parse_delta_seconds) {
                        Some(delta) if name == "max-age" => directives.max_age = Some(delta),
                        Some(delta) => directives.s_maxage = Some(delta),
                        None => errors.push(DirectiveError {
                            name: name.clone(),
                            value: arg.unwrap_or_default().to_string(),
                        }),
                    },
                    _ => {}
                }
            }
        }

        (directives, errors)
    }

    /// True when the response carries any explicit lifetime.
    pub fn has_explicit_lifetime(&self) -> bool {
        self.max_age.is_some() || self.s_maxage.is_some()
    }
}

/// Delta-seconds, saturating absurdly large values the way RFC 7234 asks
/// (anything above 2^31 is treated as 2^31).
fn parse_delta_seconds(raw: &str) -> Option<Duration> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let secs = raw.parse::<u64>().unwrap_or(u64::MAX).min(1 << 31);
    Some(Duration::from_secs(secs))
}

//! Body decoding to UTF-8.
//!
//! Charset precedence: byte-order mark, `Content-Type` charset parameter,
//! `<meta charset>` / `<meta http-equiv>` in the first KiB, then UTF-8.

use std::sync::LazyLock;

use encoding_rs::{Encoding, UTF_8};
use regex::Regex;

const SNIFF_BYTES: usize = 1024;

static META_CHARSET: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"(?i)<meta[^>]+charset\s*=\s*["']?\s*([a-z0-9_:.\-]+)"#).ok());

/// Encoding declared by a `Content-Type` header value.
pub fn from_content_type(content_type: &str) -> Option<&'static Encoding> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("charset") {
            return None;
        }
        Encoding::for_label(value.trim().trim_matches('"').as_bytes())
    })
}

/// Encoding declared in the document head.
pub fn sniff_meta(bytes: &[u8]) -> Option<&'static Encoding> {
    let head = &bytes[..bytes.len().min(SNIFF_BYTES)];
    let head = String::from_utf8_lossy(head);
    let caps = META_CHARSET.as_ref()?.captures(&head)?;
    Encoding::for_label(caps.get(1)?.as_str().as_bytes())
}

/// Decode `bytes` to UTF-8 using the best available charset hint.
pub fn decode(bytes: &[u8], content_type: Option<&str>) -> String {
    let encoding = content_type.and_then(from_content_type).or_else(|| sniff_meta(bytes)).unwrap_or(UTF_8);
    // `decode` honours a BOM over the declared encoding.
    let (text, used, had_errors) = encoding.decode(bytes);
    if had_errors {
        tracing::debug!(encoding = used.name(), "replaced malformed sequences while decoding body");
    }
    text.into_owned()
}

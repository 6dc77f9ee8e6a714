//! HTTP cache semantics: key normalization, `Cache-Control` parsing and
//! freshness evaluation. Persistence lives in [`crate::storage`].

pub mod directives;
pub mod freshness;
pub mod key;

pub use directives::Directives;
pub use freshness::{CacheInput, Freshness, Reason, evaluate, format_http_date, parse_http_date};
pub use key::{digest, normalize};

//! Case-insensitive header snapshot shared by every fetcher.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A point-in-time copy of request or response headers.
///
/// Names are stored lowercased so lookups are case-insensitive and
/// serialization is stable across backends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HeaderSnapshot(BTreeMap<String, Vec<String>>);

impl HeaderSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value under `name`.
    pub fn append(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.0
            .entry(name.as_ref().trim().to_ascii_lowercase())
            .or_default()
            .push(value.into());
    }

    /// Replace all values under `name`.
    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.0
            .insert(name.as_ref().trim().to_ascii_lowercase(), vec![value.into()]);
    }

    /// First value for `name`, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .get(&name.to_ascii_lowercase())
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// All values for `name`.
    pub fn get_all(&self, name: &str) -> &[String] {
        self.0
            .get(&name.to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(&name.to_ascii_lowercase())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0
            .iter()
            .flat_map(|(name, values)| values.iter().map(move |v| (name.as_str(), v.as_str())))
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for HeaderSnapshot {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = HeaderSnapshot::new();
        for (name, value) in iter {
            headers.append(name, value);
        }
        headers
    }
}

use std::collections::BTreeMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Header map with lowercased names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(BTreeMap<String, String>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.0.insert(name.as_ref().to_ascii_lowercase(), value.into());
    }

    pub fn with(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Caller headers win over the ones already present.
    pub fn merge(&mut self, other: &Headers) {
        for (k, v) in &other.0 {
            self.0.insert(k.clone(), v.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn content_length(&self) -> Option<u64> {
        self.get("content-length").and_then(|v| v.trim().parse().ok())
    }

    /// Whether the origin asked for the response not to be stored.
    pub fn forbids_store(&self) -> bool {
        self.get("cache-control").is_some_and(|cc| {
            cc.split(',')
                .any(|d| d.trim().eq_ignore_ascii_case("no-store"))
        })
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut headers = Headers::new();
        for (k, v) in iter {
            headers.insert(k, v);
        }
        headers
    }
}

/// Where a [`ResponseHandle`] came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ResponseSource {
    Live,
    Cached { stored_at: DateTime<Utc> },
}

/// A fully received response. The body is shared, so the handle can be read any
/// number of times: once to build a blob and once more to hand to a cache bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHandle {
    status: u16,
    headers: Headers,
    body: Bytes,
    source: ResponseSource,
}

impl ResponseHandle {
    pub fn live(status: u16, headers: Headers, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
            source: ResponseSource::Live,
        }
    }

    pub fn cached(
        status: u16,
        headers: Headers,
        body: impl Into<Bytes>,
        stored_at: DateTime<Utc>,
    ) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
            source: ResponseSource::Cached { stored_at },
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn source(&self) -> &ResponseSource {
        &self.source
    }

    pub fn is_cached(&self) -> bool {
        matches!(self.source, ResponseSource::Cached { .. })
    }

    /// Clone-read of the body. Cheap: the buffer is reference counted.
    pub fn body(&self) -> Bytes {
        self.body.clone()
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type")
    }

    /// Re-tag the same payload as served from a bucket.
    pub fn into_cached(self, stored_at: DateTime<Utc>) -> Self {
        Self {
            source: ResponseSource::Cached { stored_at },
            ..self
        }
    }
}

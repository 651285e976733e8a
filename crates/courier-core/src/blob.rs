use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use tracing::debug;
use url::Url;
use uuid::Uuid;

/// In-memory payload referenced by a `blob:` object URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub bytes: Bytes,
    pub content_type: Option<String>,
}

/// Mints `blob:<origin>/<uuid>` URLs for in-memory payloads.
///
/// Clones share the same table.
#[derive(Debug, Clone)]
pub struct BlobRegistry {
    origin: String,
    blobs: Arc<DashMap<String, Blob>>,
}

impl BlobRegistry {
    pub fn new(page_origin: &Url) -> Self {
        Self {
            origin: page_origin.origin().ascii_serialization(),
            blobs: Arc::new(DashMap::new()),
        }
    }

    pub fn create(&self, bytes: Bytes, content_type: Option<&str>) -> String {
        let url = format!("blob:{}/{}", self.origin, Uuid::new_v4());
        debug!(url = %url, bytes = bytes.len(), "Object URL created");
        self.blobs.insert(
            url.clone(),
            Blob {
                bytes,
                content_type: content_type.map(str::to_string),
            },
        );
        url
    }

    pub fn resolve(&self, url: &str) -> Option<Blob> {
        self.blobs.get(url).map(|b| b.clone())
    }

    /// Returns whether the URL was live.
    pub fn revoke(&self, url: &str) -> bool {
        self.blobs.remove(url).is_some()
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

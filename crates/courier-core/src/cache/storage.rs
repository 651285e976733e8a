use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::CacheError;
use crate::request::{Headers, ResponseHandle};

/// Everything about an entry except its body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMeta {
    pub key: String,
    pub status: u16,
    pub headers: Headers,
    pub stored_at: DateTime<Utc>,
    pub size: u64,
}

/// One bucket entry: a complete response keyed by URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    pub meta: EntryMeta,
    pub body: Bytes,
}

impl StoredEntry {
    pub fn from_response(key: &str, response: &ResponseHandle) -> Self {
        Self {
            meta: EntryMeta {
                key: key.to_string(),
                status: response.status(),
                headers: response.headers().clone(),
                stored_at: Utc::now(),
                size: response.len() as u64,
            },
            body: response.body(),
        }
    }

    pub fn into_response(self) -> ResponseHandle {
        ResponseHandle::cached(
            self.meta.status,
            self.meta.headers,
            self.body,
            self.meta.stored_at,
        )
    }
}

/// Backend holding the entries of one bucket.
///
/// Writes replace whole entries, so a concurrent reader observes either the
/// previous or the new entry, never a partial one.
#[async_trait]
pub trait BucketStorage: Send + Sync {
    /// Create whatever backing the bucket needs. Idempotent.
    async fn open(&self) -> Result<(), CacheError>;

    async fn read(&self, key: &str) -> Result<Option<StoredEntry>, CacheError>;

    async fn contains(&self, key: &str) -> Result<bool, CacheError>;

    async fn write(&self, entry: StoredEntry) -> Result<(), CacheError>;

    /// Returns whether an entry was removed.
    async fn remove(&self, key: &str) -> Result<bool, CacheError>;

    async fn entries(&self) -> Result<Vec<EntryMeta>, CacheError>;

    /// Drop every entry, returning how many were removed.
    async fn clear(&self) -> Result<usize, CacheError>;
}

/// Process-lifetime bucket.
#[derive(Debug, Default)]
pub struct MemoryBucket {
    entries: RwLock<HashMap<String, StoredEntry>>,
}

impl MemoryBucket {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BucketStorage for MemoryBucket {
    async fn open(&self) -> Result<(), CacheError> {
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Option<StoredEntry>, CacheError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn contains(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.entries.read().await.contains_key(key))
    }

    async fn write(&self, entry: StoredEntry) -> Result<(), CacheError> {
        self.entries
            .write()
            .await
            .insert(entry.meta.key.clone(), entry);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn entries(&self) -> Result<Vec<EntryMeta>, CacheError> {
        let mut metas: Vec<EntryMeta> = self
            .entries
            .read()
            .await
            .values()
            .map(|e| e.meta.clone())
            .collect();
        metas.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(metas)
    }

    async fn clear(&self) -> Result<usize, CacheError> {
        let mut entries = self.entries.write().await;
        let n = entries.len();
        entries.clear();
        Ok(n)
    }
}

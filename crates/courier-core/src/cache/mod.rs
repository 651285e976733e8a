mod disk;
mod storage;

pub use disk::DiskBucket;
pub use storage::{BucketStorage, EntryMeta, MemoryBucket, StoredEntry};

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::CourierConfig;
use crate::request::{RequestEngine, RequestError, ResponseHandle};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Bucket '{bucket}' used before open()")]
    NotOpen { bucket: String },
    #[error("Fetching {url} into bucket '{bucket}' returned status {status}")]
    Status {
        bucket: String,
        url: String,
        status: u16,
    },
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error("Cache I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Corrupt cache entry {path}: {reason}")]
    Corrupt { path: String, reason: String },
}

impl CacheError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Request(e) if e.is_cancelled())
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Request(e) => e.status_code(),
            _ => None,
        }
    }
}

/// State shared by every handle onto the same bucket name.
struct Bucket {
    storage: Arc<dyn BucketStorage>,
    opened: AtomicBool,
    inflight: DashMap<String, Arc<Mutex<()>>>,
}

impl Bucket {
    fn new(storage: Arc<dyn BucketStorage>) -> Self {
        Self {
            storage,
            opened: AtomicBool::new(false),
            inflight: DashMap::new(),
        }
    }
}

/// Hands out [`CacheStore`] handles; handles for the same name share one bucket.
#[derive(Clone)]
pub struct CacheRegistry {
    root: Option<PathBuf>,
    engine: RequestEngine,
    buckets: Arc<DashMap<String, Arc<Bucket>>>,
}

impl CacheRegistry {
    /// Buckets persist under `root`, one directory per bucket name.
    pub fn persistent(engine: RequestEngine, root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
            engine,
            buckets: Arc::new(DashMap::new()),
        }
    }

    /// Buckets live as long as the registry.
    pub fn in_memory(engine: RequestEngine) -> Self {
        Self {
            root: None,
            engine,
            buckets: Arc::new(DashMap::new()),
        }
    }

    pub fn from_config(config: &CourierConfig, engine: RequestEngine) -> Self {
        match &config.cache_root {
            Some(root) => Self::persistent(engine, root.clone()),
            None => Self::in_memory(engine),
        }
    }

    pub fn engine(&self) -> &RequestEngine {
        &self.engine
    }

    pub fn bucket(&self, name: &str) -> CacheStore {
        let bucket = self
            .buckets
            .entry(name.to_string())
            .or_insert_with(|| {
                let storage: Arc<dyn BucketStorage> = match &self.root {
                    Some(root) => Arc::new(DiskBucket::new(root.join(bucket_dir_name(name)))),
                    None => Arc::new(MemoryBucket::new()),
                };
                Arc::new(Bucket::new(storage))
            })
            .clone();

        CacheStore {
            name: name.to_string(),
            bucket,
            engine: self.engine.clone(),
            force: false,
        }
    }

    /// Bucket names handed out so far.
    pub fn bucket_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.buckets.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

/// Keep bucket names usable as a single path component.
fn bucket_dir_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '_') {
        format!("bucket_{}", hex::encode(name.as_bytes()))
    } else {
        cleaned
    }
}

/// A named key → response bucket.
///
/// `open()` must complete before any other operation. Misses in [`get`](Self::get)
/// are filled through the request engine's default path.
#[derive(Clone)]
pub struct CacheStore {
    name: String,
    bucket: Arc<Bucket>,
    engine: RequestEngine,
    force: bool,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("name", &self.name)
            .field("force", &self.force)
            .finish_non_exhaustive()
    }
}

impl CacheStore {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_force_cache(&self) -> bool {
        self.force
    }

    /// Variant that stores every successful population, ignoring origin
    /// cache-control directives.
    pub fn with_force_cache(mut self) -> Self {
        self.force = true;
        self
    }

    pub async fn open(&self) -> Result<(), CacheError> {
        if self.bucket.opened.load(Ordering::Acquire) {
            return Ok(());
        }
        self.bucket.storage.open().await?;
        self.bucket.opened.store(true, Ordering::Release);
        debug!(bucket = %self.name, "Bucket opened");
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), CacheError> {
        if self.bucket.opened.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(CacheError::NotOpen {
                bucket: self.name.clone(),
            })
        }
    }

    pub async fn has(&self, key: &str) -> Result<bool, CacheError> {
        self.ensure_open()?;
        self.bucket.storage.contains(key).await
    }

    /// The cached response for `key`, without touching the network.
    pub async fn lookup(&self, key: &str) -> Result<Option<ResponseHandle>, CacheError> {
        self.ensure_open()?;
        match self.bucket.storage.read(key).await {
            Ok(entry) => Ok(entry.map(StoredEntry::into_response)),
            Err(CacheError::Corrupt { path, reason }) => {
                warn!(bucket = %self.name, key, path = %path, reason = %reason, "Dropping corrupt entry");
                self.bucket.storage.remove(key).await?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Cached response for `key`, or fetch, store and return it.
    ///
    /// Concurrent misses on the same key share a single fetch.
    pub async fn get(&self, key: &str) -> Result<ResponseHandle, CacheError> {
        if let Some(hit) = self.lookup(key).await? {
            debug!(bucket = %self.name, key, "Cache hit");
            return Ok(hit);
        }

        let lock = self.bucket.inflight.entry(key.to_string()).or_default().clone();
        let result = {
            let _guard = lock.lock().await;
            match self.lookup(key).await {
                Ok(Some(hit)) => Ok(hit),
                Ok(None) => self.populate(key).await,
                Err(e) => Err(e),
            }
        };
        drop(lock);
        self.bucket
            .inflight
            .remove_if(key, |_, l| Arc::strong_count(l) == 1);
        result
    }

    async fn populate(&self, key: &str) -> Result<ResponseHandle, CacheError> {
        debug!(bucket = %self.name, key, "Cache miss, fetching");
        let res = self.engine.get(key).send().await?;

        if !res.is_success() {
            warn!(bucket = %self.name, key, status = res.status(), "Not caching failed fetch");
            return Err(CacheError::Status {
                bucket: self.name.clone(),
                url: key.to_string(),
                status: res.status(),
            });
        }

        if self.force || !res.headers().forbids_store() {
            self.bucket
                .storage
                .write(StoredEntry::from_response(key, &res))
                .await?;
        } else {
            debug!(bucket = %self.name, key, "Origin forbids storing response");
        }
        Ok(res)
    }

    /// Unconditionally create or overwrite the entry for `key`.
    pub async fn set(&self, key: &str, value: &ResponseHandle) -> Result<(), CacheError> {
        self.ensure_open()?;
        self.bucket
            .storage
            .write(StoredEntry::from_response(key, value))
            .await
    }

    /// Remove the entry for `key` if present.
    pub async fn del(&self, key: &str) -> Result<bool, CacheError> {
        self.ensure_open()?;
        let removed = self.bucket.storage.remove(key).await?;
        if removed {
            debug!(bucket = %self.name, key, "Entry deleted");
        }
        Ok(removed)
    }

    pub async fn entries(&self) -> Result<Vec<EntryMeta>, CacheError> {
        self.ensure_open()?;
        self.bucket.storage.entries().await
    }

    pub async fn keys(&self) -> Result<Vec<String>, CacheError> {
        Ok(self.entries().await?.into_iter().map(|m| m.key).collect())
    }

    /// Evict every entry in the bucket.
    pub async fn clear(&self) -> Result<usize, CacheError> {
        self.ensure_open()?;
        let removed = self.bucket.storage.clear().await?;
        info!(bucket = %self.name, removed, "Bucket cleared");
        Ok(removed)
    }
}

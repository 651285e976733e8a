//! Persistent bucket backed by one file per entry.
//!
//! Entry files are named by the SHA-256 of the key and laid out as
//! `MAGIC | u32 BE metadata length | metadata JSON | body`. Writes go to a
//! temp file in the bucket directory and are renamed over the target, so
//! readers see either the old or the new entry.

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

use super::storage::{BucketStorage, EntryMeta, StoredEntry};
use super::CacheError;

const MAGIC: &[u8; 4] = b"MCE1";
const ENTRY_EXT: &str = "entry";
const HEADER_LEN: usize = MAGIC.len() + 4;

#[derive(Debug, Clone)]
pub struct DiskBucket {
    dir: PathBuf,
}

impl DiskBucket {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.dir
            .join(format!("{}.{}", hex::encode(digest), ENTRY_EXT))
    }

    async fn entry_files(&self) -> Result<Vec<PathBuf>, CacheError> {
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(d) => d,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(&self.dir, e)),
        };

        let mut files = Vec::new();
        while let Some(entry) = dir.next_entry().await.map_err(|e| io_err(&self.dir, e))? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == ENTRY_EXT) {
                files.push(path);
            }
        }
        Ok(files)
    }
}

fn io_err(path: &Path, source: std::io::Error) -> CacheError {
    CacheError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn corrupt(path: &Path, reason: impl Into<String>) -> CacheError {
    CacheError::Corrupt {
        path: path.display().to_string(),
        reason: reason.into(),
    }
}

fn encode(entry: &StoredEntry) -> Result<Vec<u8>, serde_json::Error> {
    let meta = serde_json::to_vec(&entry.meta)?;
    let mut out = Vec::with_capacity(HEADER_LEN + meta.len() + entry.body.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&(meta.len() as u32).to_be_bytes());
    out.extend_from_slice(&meta);
    out.extend_from_slice(&entry.body);
    Ok(out)
}

fn meta_len(path: &Path, header: &[u8]) -> Result<usize, CacheError> {
    if header.len() < HEADER_LEN || &header[..MAGIC.len()] != MAGIC {
        return Err(corrupt(path, "bad header"));
    }
    let mut len = [0u8; 4];
    len.copy_from_slice(&header[MAGIC.len()..HEADER_LEN]);
    Ok(u32::from_be_bytes(len) as usize)
}

fn decode(path: &Path, raw: Bytes) -> Result<StoredEntry, CacheError> {
    let len = meta_len(path, &raw)?;
    let body_start = HEADER_LEN + len;
    if raw.len() < body_start {
        return Err(corrupt(path, "truncated metadata"));
    }
    let meta: EntryMeta = serde_json::from_slice(&raw[HEADER_LEN..body_start])
        .map_err(|e| corrupt(path, e.to_string()))?;
    let body = raw.slice(body_start..);
    if body.len() as u64 != meta.size {
        return Err(corrupt(
            path,
            format!("expected {} body bytes, found {}", meta.size, body.len()),
        ));
    }
    Ok(StoredEntry { meta, body })
}

/// Header and metadata of an entry file, checked against the file size so a
/// damaged length field never drives an allocation.
async fn read_meta(path: &Path) -> Result<EntryMeta, CacheError> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| io_err(path, e))?;
    let size = file.metadata().await.map_err(|e| io_err(path, e))?.len();
    let mut header = [0u8; HEADER_LEN];
    file.read_exact(&mut header)
        .await
        .map_err(|_| corrupt(path, "bad header"))?;
    let len = meta_len(path, &header)?;
    let body_start = (HEADER_LEN + len) as u64;
    if body_start > size {
        return Err(corrupt(path, "truncated metadata"));
    }

    let mut meta = vec![0u8; len];
    file.read_exact(&mut meta)
        .await
        .map_err(|_| corrupt(path, "truncated metadata"))?;
    let meta: EntryMeta =
        serde_json::from_slice(&meta).map_err(|e| corrupt(path, e.to_string()))?;
    if size - body_start != meta.size {
        return Err(corrupt(
            path,
            format!("expected {} body bytes, found {}", meta.size, size - body_start),
        ));
    }
    Ok(meta)
}

#[async_trait]
impl BucketStorage for DiskBucket {
    async fn open(&self) -> Result<(), CacheError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_err(&self.dir, e))
    }

    async fn read(&self, key: &str) -> Result<Option<StoredEntry>, CacheError> {
        let path = self.entry_path(key);
        match tokio::fs::read(&path).await {
            Ok(raw) => decode(&path, Bytes::from(raw)).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err(&path, e)),
        }
    }

    async fn contains(&self, key: &str) -> Result<bool, CacheError> {
        let path = self.entry_path(key);
        match read_meta(&path).await {
            Ok(_) => Ok(true),
            Err(CacheError::Io { source, .. }) if source.kind() == ErrorKind::NotFound => Ok(false),
            Err(CacheError::Corrupt { reason, .. }) => {
                debug!(key, path = %path.display(), reason = %reason, "Corrupt entry counts as absent");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn write(&self, entry: StoredEntry) -> Result<(), CacheError> {
        let path = self.entry_path(&entry.meta.key);
        let dir = self.dir.clone();
        let bytes = encode(&entry).map_err(|e| corrupt(&path, e.to_string()))?;

        let target = path.clone();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut tmp = NamedTempFile::new_in(&dir)?;
            tmp.write_all(&bytes)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&target).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| io_err(&path, std::io::Error::other(e)))?
        .map_err(|e| io_err(&path, e))?;

        debug!(key = %entry.meta.key, path = %path.display(), bytes = entry.meta.size, "Entry written");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool, CacheError> {
        let path = self.entry_path(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_err(&path, e)),
        }
    }

    async fn entries(&self) -> Result<Vec<EntryMeta>, CacheError> {
        let mut metas = Vec::new();
        for path in self.entry_files().await? {
            match read_meta(&path).await {
                Ok(meta) => metas.push(meta),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable entry"),
            }
        }
        metas.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(metas)
    }

    async fn clear(&self) -> Result<usize, CacheError> {
        let mut removed = 0;
        for path in self.entry_files().await? {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(io_err(&path, e)),
            }
        }
        Ok(removed)
    }
}

//! File-based cache backend.
//!
//! [`FileStorage`] keeps each store in its own subdirectory and each entry in a
//! single file named after the identity digest. The file holds a length-prefixed
//! JSON header followed by the raw body:
//!
//! ```text
//! [meta_len: u32 LE][meta json][body bytes]
//! ```
//!
//! Entries are written to a temporary file and renamed into place, so a reader
//! sees either the previous entry or the new one, never a torn write. Two
//! concurrent writers for the same identity resolve as last-rename-wins.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::fs;

use super::{CacheStorage, CacheStore, RequestIdentity, StoreError, StoredResponse, validate_name};
use crate::BoxFuture;
use crate::http::{Headers, StatusCode};

const ENTRY_EXTENSION: &str = "entry";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Durable [`CacheStorage`] rooted at a directory on disk.
///
/// Directory layout:
/// ```text
/// {root}/
/// +-- v1/                     # store "v1"
/// |   +-- 3f2a...e1.entry     # one file per cached request
/// +-- v0/
///     +-- ...
/// ```
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    /// Creates a storage rooted at `root`. Nothing is touched on disk until a
    /// store is opened.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl CacheStorage for FileStorage {
    fn open<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Arc<dyn CacheStore>, StoreError>> {
        Box::pin(async move {
            validate_name(name)?;
            let dir = self.root.join(name);
            fs::create_dir_all(&dir).await.map_err(|e| io_error(&dir, e))?;
            tracing::debug!(store = name, dir = %dir.display(), "opened cache store");
            let store: Arc<dyn CacheStore> = Arc::new(FileStore {
                name: name.to_owned(),
                dir,
            });
            Ok(store)
        })
    }

    fn names(&self) -> BoxFuture<'_, Result<Vec<String>, StoreError>> {
        Box::pin(async move {
            let mut dir = match fs::read_dir(&self.root).await {
                Ok(dir) => dir,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
                Err(e) => return Err(io_error(&self.root, e)),
            };

            let mut names = Vec::new();
            while let Some(entry) = dir.next_entry().await.map_err(|e| io_error(&self.root, e))? {
                let is_dir = entry
                    .file_type()
                    .await
                    .map(|t| t.is_dir())
                    .unwrap_or(false);
                if !is_dir {
                    continue;
                }
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_owned());
                }
            }
            names.sort();
            Ok(names)
        })
    }
}

/// Header stored in front of the body of every entry.
#[derive(Debug, Serialize, Deserialize)]
struct EntryMeta {
    identity: RequestIdentity,
    status: u16,
    headers: Headers,
}

struct FileStore {
    name: String,
    dir: PathBuf,
}

impl FileStore {
    fn entry_path(&self, identity: &RequestIdentity) -> PathBuf {
        self.dir
            .join(identity.digest())
            .with_extension(ENTRY_EXTENSION)
    }
}

impl CacheStore for FileStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookup<'a>(
        &'a self,
        identity: &'a RequestIdentity,
    ) -> BoxFuture<'a, Result<Option<StoredResponse>, StoreError>> {
        Box::pin(async move {
            let path = self.entry_path(identity);
            let raw = match fs::read(&path).await {
                Ok(raw) => raw,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(io_error(&path, e)),
            };

            let Some((meta, body)) = decode(raw)? else {
                tracing::warn!(path = %path.display(), "ignoring truncated cache entry");
                return Ok(None);
            };
            if &meta.identity != identity {
                return Ok(None);
            }
            Ok(Some(StoredResponse::new(
                StatusCode::from_u16(meta.status),
                meta.headers,
                body,
            )))
        })
    }

    fn put<'a>(
        &'a self,
        identity: &'a RequestIdentity,
        entry: StoredResponse,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let meta = EntryMeta {
                identity: identity.clone(),
                status: entry.status().as_u16(),
                headers: entry.headers().clone(),
            };
            let buf = encode(&meta, entry.body())?;
            let path = self.entry_path(identity);
            write_atomic(&path, &buf).await?;
            tracing::debug!(store = %self.name, %identity, bytes = entry.body().len(), "cache entry written");
            Ok(())
        })
    }

    fn keys(&self) -> BoxFuture<'_, Result<Vec<RequestIdentity>, StoreError>> {
        Box::pin(async move {
            let mut dir = fs::read_dir(&self.dir)
                .await
                .map_err(|e| io_error(&self.dir, e))?;
            let mut keys = Vec::new();
            while let Some(entry) = dir.next_entry().await.map_err(|e| io_error(&self.dir, e))? {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXTENSION) {
                    continue;
                }
                let raw = fs::read(&path).await.map_err(|e| io_error(&path, e))?;
                if let Some((meta, _)) = decode(raw)? {
                    keys.push(meta.identity);
                }
            }
            keys.sort();
            Ok(keys)
        })
    }
}

fn encode(meta: &EntryMeta, body: &Bytes) -> Result<Vec<u8>, StoreError> {
    let meta_json = serde_json::to_vec(meta)?;
    let mut buf = Vec::with_capacity(4 + meta_json.len() + body.len());
    buf.extend_from_slice(&(meta_json.len() as u32).to_le_bytes());
    buf.extend_from_slice(&meta_json);
    buf.extend_from_slice(body);
    Ok(buf)
}

// `None` when the file is shorter than its own header claims.
fn decode(raw: Vec<u8>) -> Result<Option<(EntryMeta, Bytes)>, StoreError> {
    let Some(len_bytes) = raw.get(..4) else {
        return Ok(None);
    };
    let mut len_buf = [0u8; 4];
    len_buf.copy_from_slice(len_bytes);
    let meta_len = u32::from_le_bytes(len_buf) as usize;

    let Some(meta_bytes) = raw.get(4..4 + meta_len) else {
        return Ok(None);
    };
    let meta: EntryMeta = serde_json::from_slice(meta_bytes)?;
    let body = Bytes::from(raw).slice(4 + meta_len..);
    Ok(Some((meta, body)))
}

async fn write_atomic(path: &Path, content: &[u8]) -> Result<(), StoreError> {
    let seq = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let temp_path = path.with_extension(format!("tmp-{}-{seq}", std::process::id()));

    fs::write(&temp_path, content)
        .await
        .map_err(|e| io_error(&temp_path, e))?;

    if let Err(e) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(io_error(path, e));
    }
    Ok(())
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

//! Cache Store: durable, named mappings from request identity to a stored response.
//!
//! Two traits form the API:
//!
//! - [`CacheStorage`]: the collection of named stores (`open`, cross-store `match_any`)
//! - [`CacheStore`]: one named store (`lookup`, `put`, `keys`)
//!
//! # Implementations
//!
//! - [`MemoryStorage`]: process-local, for tests and cacheless runs
//! - [`FileStorage`]: one directory per store, survives restarts
//!
//! Stores are append/overwrite only. Nothing here evicts or deletes entries.

mod file;
mod memory;

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use url::Url;

use crate::BoxFuture;
use crate::http::{Body, Headers, Method, Response, StatusCode};

pub use file::FileStorage;
pub use memory::MemoryStorage;

/// Errors raised by a cache backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to (de)serialize cache entry: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("invalid cache store name {name:?}")]
    InvalidName { name: String },
}

/// Key under which a response is cached: method plus absolute URL.
///
/// The fragment is dropped, it never reaches the server. The textual form
/// `"METHOD URL"` is stable across restarts, so [`digest`](Self::digest) can
/// name files on disk.
///
/// # Examples
///
/// ```
/// use cachefront::cache::RequestIdentity;
/// use cachefront::http::Method;
/// use url::Url;
///
/// let url = Url::parse("http://localhost/gallery/vader.jpg#top").unwrap();
/// let id = RequestIdentity::new(Method::Get, &url);
/// assert_eq!(id.to_string(), "GET http://localhost/gallery/vader.jpg");
/// assert_eq!(id.digest().len(), 64);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestIdentity {
    method: String,
    url: String,
}

impl RequestIdentity {
    /// Derives the identity of a `method` request to `url`.
    pub fn new(method: Method, url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self {
            method: method.as_str().to_owned(),
            url: url.into(),
        }
    }

    /// Identity of a plain `GET`, as used for seeded assets and the fallback.
    pub fn get(url: &Url) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Lowercase hex SHA-256 of the textual identity.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.method.as_bytes());
        hasher.update(b" ");
        hasher.update(self.url.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl fmt::Display for RequestIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// Immutable snapshot of a response taken at write time.
///
/// Reading a snapshot never consumes it: every [`into_response`](Self::into_response)
/// call on a clone hands out a fresh [`Response`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredResponse {
    status: StatusCode,
    headers: Headers,
    body: Bytes,
}

impl StoredResponse {
    pub fn new(status: StatusCode, headers: Headers, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Rehydrates the snapshot into a response ready to be returned.
    pub fn into_response(self) -> Response {
        Response::from_parts(self.status, self.headers, Body::new(self.body))
    }
}

impl From<Response> for StoredResponse {
    /// Consumes the store copy of a response. Connection-scoped headers are
    /// not part of the snapshot.
    fn from(response: Response) -> Self {
        let (status, headers, body) = response.into_parts();
        Self {
            status,
            headers: headers.end_to_end(),
            body: body.into_bytes(),
        }
    }
}

/// One named store.
pub trait CacheStore: Send + Sync {
    /// Name (version) under which this store was opened.
    fn name(&self) -> &str;

    /// Returns the entry stored for `identity`, if any.
    fn lookup<'a>(
        &'a self,
        identity: &'a RequestIdentity,
    ) -> BoxFuture<'a, Result<Option<StoredResponse>, StoreError>>;

    /// Stores `entry` under `identity`, replacing any previous entry.
    fn put<'a>(
        &'a self,
        identity: &'a RequestIdentity,
        entry: StoredResponse,
    ) -> BoxFuture<'a, Result<(), StoreError>>;

    /// Lists the identities currently stored.
    fn keys(&self) -> BoxFuture<'_, Result<Vec<RequestIdentity>, StoreError>>;
}

/// The set of named stores known to the agent.
pub trait CacheStorage: Send + Sync {
    /// Opens the store called `name`, creating it if absent.
    fn open<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Arc<dyn CacheStore>, StoreError>>;

    /// Names of all existing stores, in ascending order.
    fn names(&self) -> BoxFuture<'_, Result<Vec<String>, StoreError>>;

    /// Returns `true` if a store called `name` exists.
    fn has<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<bool, StoreError>> {
        Box::pin(async move { Ok(self.names().await?.iter().any(|n| n == name)) })
    }

    /// Looks `identity` up in every store, in ascending name order, and returns
    /// the first hit. The store name plays no part in the match.
    fn match_any<'a>(
        &'a self,
        identity: &'a RequestIdentity,
    ) -> BoxFuture<'a, Result<Option<StoredResponse>, StoreError>> {
        Box::pin(async move {
            for name in self.names().await? {
                let store = self.open(&name).await?;
                if let Some(entry) = store.lookup(identity).await? {
                    return Ok(Some(entry));
                }
            }
            Ok(None)
        })
    }
}

/// Rejects store names that could escape a storage root.
pub(crate) fn validate_name(name: &str) -> Result<(), StoreError> {
    let bad = name.is_empty()
        || name == "."
        || name.contains("..")
        || name.contains(['/', '\\'])
        || name.chars().any(char::is_control);
    if bad {
        return Err(StoreError::InvalidName {
            name: name.to_owned(),
        });
    }
    Ok(())
}

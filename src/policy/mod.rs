//! Retrieval Policy: the cache-first decision for one intercepted request.
//!
//! The stages run strictly in order and stop at the first one that yields a
//! response:
//!
//! | Stage        | Source                               | Side effect             |
//! |--------------|--------------------------------------|-------------------------|
//! | cache        | any store holding the identity       | none                    |
//! | preload      | the race-started navigation preload  | store copy written (*)  |
//! | network      | live fetch of a duplicate request    | store copy written (*)  |
//! | fallback     | the pre-seeded fallback asset        | none                    |
//! | synthetic    | `408 text/plain`                     | none                    |
//!
//! (*) Except `206` and `304`, which never describe the whole resource.
//!
//! Cache writes are detached onto the caller's [`TaskGroup`]; the response is
//! returned without waiting for them. [`RetrievalPolicy::resolve`] never fails.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::background::TaskGroup;
use crate::cache::{CacheStorage, RequestIdentity, StoredResponse};
use crate::fetch::Fetch;
use crate::http::{Request, Response};
use crate::preload::PreloadResponse;

/// Which stage produced the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    CacheHit,
    PreloadHit,
    NetworkHit,
    FallbackHit,
    NoFallback,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CacheHit => "cache",
            Self::PreloadHit => "preload",
            Self::NetworkHit => "network",
            Self::FallbackHit => "fallback",
            Self::NoFallback => "synthetic",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cache-first resolver bound to one storage, one transport and one store name.
///
/// Cheap to clone; the policy holds no per-request state of its own.
#[derive(Clone)]
pub struct RetrievalPolicy {
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetch>,
    store_name: String,
}

impl RetrievalPolicy {
    /// `store_name` is where preload and network responses are written. Lookups
    /// search every store regardless of name.
    pub fn new(
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetch>,
        store_name: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            fetcher,
            store_name: store_name.into(),
        }
    }

    /// Resolves `request` to a response. See [`resolve_with_outcome`](Self::resolve_with_outcome).
    pub async fn resolve(
        &self,
        request: Request,
        preload: PreloadResponse,
        fallback: &RequestIdentity,
        tasks: &TaskGroup,
    ) -> Response {
        self.resolve_with_outcome(request, preload, fallback, tasks)
            .await
            .1
    }

    /// Resolves `request` and reports which stage answered it.
    ///
    /// Cache writes for preload and network responses are spawned onto `tasks`;
    /// await [`TaskGroup::wait`] to know they have landed.
    pub async fn resolve_with_outcome(
        &self,
        request: Request,
        preload: PreloadResponse,
        fallback: &RequestIdentity,
        tasks: &TaskGroup,
    ) -> (Outcome, Response) {
        let identity = request.identity();

        if let Some(entry) = self.lookup(&identity).await {
            debug!(%identity, "served from cache");
            return (Outcome::CacheHit, entry.into_response());
        }

        if let Some(response) = preload.resolve().await {
            info!(%identity, status = %response.status(), "using preload response");
            let (returned, stored) = response.tee();
            self.put_detached(tasks, identity, stored);
            return (Outcome::PreloadHit, returned);
        }

        match self.fetcher.fetch(request.duplicate()).await {
            Ok(response) => {
                debug!(%identity, status = %response.status(), "served from network");
                let (returned, stored) = response.tee();
                self.put_detached(tasks, identity, stored);
                (Outcome::NetworkHit, returned)
            }
            Err(e) => {
                warn!(%identity, error = %e, "network fetch failed, trying fallback");
                match self.lookup(fallback).await {
                    Some(entry) => {
                        debug!(%identity, fallback = %fallback, "served fallback asset");
                        (Outcome::FallbackHit, entry.into_response())
                    }
                    None => {
                        warn!(%identity, fallback = %fallback, "fallback asset missing from cache");
                        (Outcome::NoFallback, Response::network_error())
                    }
                }
            }
        }
    }

    // Store errors read as a miss: a broken cache must not stop the fall-through.
    async fn lookup(&self, identity: &RequestIdentity) -> Option<StoredResponse> {
        match self.storage.match_any(identity).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(%identity, error = %e, "cache lookup failed");
                None
            }
        }
    }

    fn put_detached(&self, tasks: &TaskGroup, identity: RequestIdentity, response: Response) {
        if !response.status().is_cacheable() {
            debug!(%identity, status = %response.status(), "not caching partial response");
            return;
        }
        let storage = Arc::clone(&self.storage);
        let store_name = self.store_name.clone();
        tasks.spawn(async move {
            let store = storage.open(&store_name).await?;
            store.put(&identity, StoredResponse::from(response)).await?;
            debug!(%identity, store = %store_name, "response cached");
            Ok(())
        });
    }
}

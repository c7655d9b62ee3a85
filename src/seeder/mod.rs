//! Bulk Seeder: install-time population of the cache (`addAll`).
//!
//! Every listed resource is fetched concurrently. Only when all of them came
//! back with a `2xx` status are they written to the store; a single failure
//! fails the batch and nothing from it is written.

use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheStorage, RequestIdentity, StoreError, StoredResponse};
use crate::fetch::{Fetch, FetchError};
use crate::http::{Request, StatusCode};

/// Reasons a seeding batch fails.
#[derive(Debug, Error)]
pub enum SeedError {
    #[error("failed to fetch {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: FetchError,
    },

    #[error("{url} answered {status}, refusing to cache it")]
    Status { url: String, status: StatusCode },

    #[error("seeding fetch task did not complete: {0}")]
    Interrupted(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Fetches a resource list into a named store as one all-or-nothing batch.
#[derive(Clone)]
pub struct BulkSeeder {
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetch>,
    store_name: String,
}

impl BulkSeeder {
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

    /// Name of the store this seeder writes to.
    pub fn store_name(&self) -> &str {
        &self.store_name
    }

    /// Fetches every URL in `resources` and stores each under its `GET` identity.
    ///
    /// Returns the number of entries written.
    ///
    /// # Errors
    ///
    /// - [`SeedError::Fetch`] / [`SeedError::Status`]: a resource could not be
    ///   fetched or was not `2xx`; the remaining fetches are cancelled.
    /// - [`SeedError::Store`]: the store could not be opened or written.
    pub async fn seed(&self, resources: &[Url]) -> Result<usize, SeedError> {
        let store = self.storage.open(&self.store_name).await?;
        info!(store = %self.store_name, count = resources.len(), "seeding cache");

        let mut fetches = JoinSet::new();
        for (index, url) in resources.iter().enumerate() {
            let fetcher = Arc::clone(&self.fetcher);
            let url = url.clone();
            fetches.spawn(async move {
                let result = fetcher.fetch(Request::get(url.clone())).await;
                (index, url, result)
            });
        }

        let mut fetched = Vec::with_capacity(resources.len());
        while let Some(joined) = fetches.join_next().await {
            let (index, url, result) = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    fetches.abort_all();
                    return Err(SeedError::Interrupted(e));
                }
            };

            let response = match result {
                Ok(response) => response,
                Err(source) => {
                    fetches.abort_all();
                    warn!(url = %url, error = %source, "seed fetch failed");
                    return Err(SeedError::Fetch {
                        url: url.to_string(),
                        source,
                    });
                }
            };

            if !response.status().is_success() {
                fetches.abort_all();
                warn!(url = %url, status = %response.status(), "seed fetch returned non-success status");
                return Err(SeedError::Status {
                    url: url.to_string(),
                    status: response.status(),
                });
            }

            debug!(url = %url, "seed resource fetched");
            fetched.push((index, RequestIdentity::get(&url), StoredResponse::from(response)));
        }

        fetched.sort_by_key(|(index, _, _)| *index);
        let count = fetched.len();
        for (_, identity, entry) in fetched {
            store.put(&identity, entry).await?;
        }

        info!(store = %self.store_name, count, "cache seeded");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BoxFuture;
    use crate::cache::MemoryStorage;
    use crate::http::Response;

    struct PathFetcher;

    impl Fetch for PathFetcher {
        fn fetch(&self, request: Request) -> BoxFuture<'_, Result<Response, FetchError>> {
            Box::pin(async move {
                match request.path() {
                    "/live" => Err(FetchError::Network {
                        url: request.url().to_string(),
                        message: "connection refused".into(),
                    }),
                    "/missing" => Ok(Response::new(StatusCode::NOT_FOUND)),
                    path => Ok(Response::new(StatusCode::OK).body(format!("body of {path}"))),
                }
            })
        }
    }

    fn urls(paths: &[&str]) -> Vec<Url> {
        let base = Url::parse("http://localhost:3000").unwrap();
        paths.iter().map(|p| base.join(p).unwrap()).collect()
    }

    fn seeder(storage: &MemoryStorage) -> BulkSeeder {
        BulkSeeder::new(Arc::new(storage.clone()), Arc::new(PathFetcher), "v1")
    }

    #[tokio::test]
    async fn seeds_every_resource() {
        let storage = MemoryStorage::new();
        let resources = urls(&["/", "/gallery/vader.jpg"]);
        let count = seeder(&storage).seed(&resources).await.unwrap();
        assert_eq!(count, 2);

        let store = storage.open("v1").await.unwrap();
        let entry = store
            .lookup(&RequestIdentity::get(&resources[1]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.body().as_ref(), b"body of /gallery/vader.jpg");
    }

    #[tokio::test]
    async fn one_failed_fetch_fails_the_batch() {
        let storage = MemoryStorage::new();
        let err = seeder(&storage)
            .seed(&urls(&["/", "/live"]))
            .await
            .unwrap_err();
        assert!(matches!(err, SeedError::Fetch { ref url, .. } if url.ends_with("/live")));
    }

    #[tokio::test]
    async fn non_success_status_fails_the_batch() {
        let storage = MemoryStorage::new();
        let err = seeder(&storage)
            .seed(&urls(&["/", "/missing"]))
            .await
            .unwrap_err();
        assert!(matches!(err, SeedError::Status { status, .. } if status == StatusCode::NOT_FOUND));
    }

    #[tokio::test]
    async fn empty_list_opens_the_store() {
        let storage = MemoryStorage::new();
        assert_eq!(seeder(&storage).seed(&[]).await.unwrap(), 0);
        assert!(storage.has("v1").await.unwrap());
    }
}

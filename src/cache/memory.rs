//! In-process cache backend.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::{CacheStorage, CacheStore, RequestIdentity, StoreError, StoredResponse, validate_name};
use crate::BoxFuture;

type Entries = Arc<RwLock<BTreeMap<RequestIdentity, StoredResponse>>>;

/// [`CacheStorage`] held entirely in memory.
///
/// Handles opened under the same name share their entries. Cloning the
/// storage shares everything.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    stores: Arc<RwLock<BTreeMap<String, Entries>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStorage for MemoryStorage {
    fn open<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Arc<dyn CacheStore>, StoreError>> {
        Box::pin(async move {
            validate_name(name)?;
            let mut stores = self.stores.write().await;
            let entries = Arc::clone(stores.entry(name.to_owned()).or_default());
            let store: Arc<dyn CacheStore> = Arc::new(MemoryStore {
                name: name.to_owned(),
                entries,
            });
            Ok(store)
        })
    }

    fn names(&self) -> BoxFuture<'_, Result<Vec<String>, StoreError>> {
        Box::pin(async move { Ok(self.stores.read().await.keys().cloned().collect()) })
    }
}

struct MemoryStore {
    name: String,
    entries: Entries,
}

impl CacheStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookup<'a>(
        &'a self,
        identity: &'a RequestIdentity,
    ) -> BoxFuture<'a, Result<Option<StoredResponse>, StoreError>> {
        Box::pin(async move { Ok(self.entries.read().await.get(identity).cloned()) })
    }

    fn put<'a>(
        &'a self,
        identity: &'a RequestIdentity,
        entry: StoredResponse,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            self.entries.write().await.insert(identity.clone(), entry);
            Ok(())
        })
    }

    fn keys(&self) -> BoxFuture<'_, Result<Vec<RequestIdentity>, StoreError>> {
        Box::pin(async move { Ok(self.entries.read().await.keys().cloned().collect()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{Headers, StatusCode};
    use url::Url;

    fn id(path: &str) -> RequestIdentity {
        RequestIdentity::get(&Url::parse("http://localhost").unwrap().join(path).unwrap())
    }

    fn entry(body: &'static str) -> StoredResponse {
        StoredResponse::new(StatusCode::OK, Headers::new(), body)
    }

    #[tokio::test]
    async fn open_is_lazy_and_shared() {
        let storage = MemoryStorage::new();
        assert!(!storage.has("v1").await.unwrap());

        let a = storage.open("v1").await.unwrap();
        let b = storage.open("v1").await.unwrap();
        a.put(&id("/"), entry("home")).await.unwrap();

        assert!(storage.has("v1").await.unwrap());
        assert_eq!(b.lookup(&id("/")).await.unwrap(), Some(entry("home")));
    }

    #[tokio::test]
    async fn put_overwrites() {
        let storage = MemoryStorage::new();
        let store = storage.open("v1").await.unwrap();
        store.put(&id("/a"), entry("first")).await.unwrap();
        store.put(&id("/a"), entry("second")).await.unwrap();
        assert_eq!(store.keys().await.unwrap().len(), 1);
        assert_eq!(store.lookup(&id("/a")).await.unwrap(), Some(entry("second")));
    }

    #[tokio::test]
    async fn match_any_searches_every_store() {
        let storage = MemoryStorage::new();
        storage.open("v1").await.unwrap();
        let old = storage.open("v0").await.unwrap();
        old.put(&id("/legacy"), entry("old")).await.unwrap();

        assert_eq!(storage.match_any(&id("/legacy")).await.unwrap(), Some(entry("old")));
        assert_eq!(storage.match_any(&id("/missing")).await.unwrap(), None);
    }
}

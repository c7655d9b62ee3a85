use std::sync::Arc;

use tracing::info;
use url::Url;

use super::{ActivateEvent, FetchEvent, InstallEvent, Worker};
use crate::BoxFuture;
use crate::cache::{CacheStorage, RequestIdentity};
use crate::fetch::Fetch;
use crate::http::Response;
use crate::policy::RetrievalPolicy;
use crate::seeder::BulkSeeder;

/// The offline-first worker: seeds on install, enables navigation preload on
/// activate, and answers fetches cache-first.
pub struct CacheFirstWorker {
    seeder: BulkSeeder,
    policy: RetrievalPolicy,
    assets: Arc<[Url]>,
    fallback: RequestIdentity,
}

impl CacheFirstWorker {
    /// `fallback` is expected to be one of `assets` so that it is seeded.
    pub fn new(
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetch>,
        store_name: &str,
        assets: Vec<Url>,
        fallback: &Url,
    ) -> Self {
        if !assets.contains(fallback) {
            tracing::warn!(fallback = %fallback, "fallback asset is not in the install list");
        }
        Self {
            seeder: BulkSeeder::new(Arc::clone(&storage), Arc::clone(&fetcher), store_name),
            policy: RetrievalPolicy::new(storage, fetcher, store_name),
            assets: assets.into(),
            fallback: RequestIdentity::get(fallback),
        }
    }

    pub fn fallback(&self) -> &RequestIdentity {
        &self.fallback
    }
}

impl Worker for CacheFirstWorker {
    fn install(&self, event: &InstallEvent) {
        info!(count = self.assets.len(), "installing: seeding offline assets");
        let seeder = self.seeder.clone();
        let assets = Arc::clone(&self.assets);
        event.wait_until(async move {
            seeder.seed(&assets).await?;
            Ok(())
        });
    }

    fn activate(&self, event: &ActivateEvent) {
        if let Some(manager) = event.registration().navigation_preload() {
            let manager = Arc::clone(manager);
            event.wait_until(async move {
                manager.enable();
                info!("navigation preload enabled");
                Ok(())
            });
        }
    }

    fn fetch(&self, event: FetchEvent) -> BoxFuture<'_, Response> {
        Box::pin(async move {
            let (request, preload, tasks) = event.into_parts();
            self.policy
                .resolve(request, preload, &self.fallback, &tasks)
                .await
        })
    }
}

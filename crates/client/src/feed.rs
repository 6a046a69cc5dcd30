//! Prayer feeds read through the query cache.
//!
//! The global feed lives under `prayers`, each author's feed under
//! `prayers/{author_id}`. Both are plain `Vec<Prayer>` values so the mutation
//! pipeline can patch them in place.

use futures_util::future::BoxFuture;
use prayerline_core::cache::{QueryObserver, QuerySnapshot};
use prayerline_core::{CacheKey, Error, GatewayError, Prayer, PrayerGateway, QueryCache};
use std::sync::Arc;

/// Cache key for the global feed (`None`) or one author's feed.
pub fn feed_key(author_id: Option<&str>) -> CacheKey {
    match author_id {
        Some(id) => CacheKey::prayers_by(id),
        None => CacheKey::prayers(),
    }
}

/// Read side of the prayer feeds.
#[derive(Clone)]
pub struct PrayerFeed {
    gateway: Arc<dyn PrayerGateway>,
    cache: QueryCache<Vec<Prayer>>,
}

impl PrayerFeed {
    pub fn new(gateway: Arc<dyn PrayerGateway>, cache: QueryCache<Vec<Prayer>>) -> Self {
        Self { gateway, cache }
    }

    pub fn cache(&self) -> &QueryCache<Vec<Prayer>> {
        &self.cache
    }

    fn loader(
        &self, author_id: Option<&str>,
    ) -> impl Fn() -> BoxFuture<'static, Result<Vec<Prayer>, GatewayError>> + Send + Sync + 'static {
        let gateway = Arc::clone(&self.gateway);
        let author_id = author_id.map(str::to_owned);
        move || {
            let gateway = Arc::clone(&gateway);
            let author_id = author_id.clone();
            Box::pin(async move {
                match author_id {
                    Some(id) => gateway.list_prayers_by_author(&id).await,
                    None => gateway.list_prayers().await,
                }
            })
        }
    }

    /// Cached feed, refreshed in the background when missing or stale.
    pub fn read(&self, author_id: Option<&str>) -> QuerySnapshot<Vec<Prayer>> {
        self.cache.read(&feed_key(author_id), self.loader(author_id))
    }

    /// Feed contents, waiting for the gateway when nothing fresh is cached.
    pub async fn fetch(&self, author_id: Option<&str>) -> Result<Vec<Prayer>, Error> {
        self.cache.fetch(&feed_key(author_id), self.loader(author_id)).await
    }

    /// Register interest in a feed so stale reads revalidate and GC spares it.
    pub fn observe(&self, author_id: Option<&str>) -> QueryObserver<Vec<Prayer>> {
        self.cache.observe(&feed_key(author_id))
    }

    /// Mark every feed stale.
    pub fn invalidate_all(&self) -> usize {
        self.cache.invalidate(&CacheKey::prayers())
    }
}

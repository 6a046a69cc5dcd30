//! One signed-in session: shared cache, feeds, mutations and avatars.

use crate::avatar::{AvatarConfig, AvatarSync};
use crate::feed::PrayerFeed;
use crate::mutations::PrayerMutations;
use crate::preload::{HttpImageLoader, ImageLoader, PreloadError};
use crate::rest::{RestConfig, RestGateway};
use prayerline_core::config::{AppConfig, ConfigError};
use prayerline_core::{GatewayError, Prayer, PrayerGateway, QueryCache, SignalBus};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;

/// Errors raised while assembling a session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("gateway setup failed: {0}")]
    Gateway(#[from] GatewayError),

    #[error("image loader setup failed: {0}")]
    Preload(#[from] PreloadError),
}

/// Owns every cache for one user session. Dropping it, or calling
/// [`shutdown`](Self::shutdown), discards all cached state.
pub struct Session {
    cache: QueryCache<Vec<Prayer>>,
    feed: PrayerFeed,
    mutations: PrayerMutations,
    avatars: AvatarSync,
    gc: JoinHandle<()>,
}

impl Session {
    /// Assemble a session around an existing gateway and image loader.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if a cache policy is inconsistent.
    pub fn new(
        config: &AppConfig, gateway: Arc<dyn PrayerGateway>, loader: Arc<dyn ImageLoader>, bus: &dyn SignalBus,
    ) -> Result<Self, SessionError> {
        let cache = QueryCache::new(config.policy_table()?, config.query_retry());
        let feed = PrayerFeed::new(Arc::clone(&gateway), cache.clone());
        let mutations = PrayerMutations::new(Arc::clone(&gateway), cache.clone(), config.mutation_retry());
        let avatars = AvatarSync::new(gateway, loader, bus, AvatarConfig::from_app_config(config));
        let gc = cache.spawn_gc(config.gc_interval());

        tracing::info!(gc_interval_ms = config.gc_interval_ms, "session started");
        Ok(Self { cache, feed, mutations, avatars, gc })
    }

    /// Assemble a session talking to the configured REST service.
    pub fn connect(config: &AppConfig, bus: &dyn SignalBus) -> Result<Self, SessionError> {
        let gateway = RestGateway::new(RestConfig::from_app_config(config)?)?;
        let loader = HttpImageLoader::new(config.preload_timeout())?;
        Self::new(config, Arc::new(gateway), Arc::new(loader), bus)
    }

    pub fn feed(&self) -> &PrayerFeed {
        &self.feed
    }

    pub fn mutations(&self) -> &PrayerMutations {
        &self.mutations
    }

    pub fn avatars(&self) -> &AvatarSync {
        &self.avatars
    }

    /// Stop background work and drop every cached entry.
    pub async fn shutdown(self) {
        self.gc.abort();
        self.cache.clear();
        self.avatars.shutdown().await;
        tracing::info!("session closed");
    }
}

//! Write pipeline: gateway call, then in-place patch of every cached feed.
//!
//! A confirmed write is reflected in the cache before its state flips to
//! `Succeeded`, and no list is refetched just to show it. Patches are keyed
//! by prayer id, so applying the same result twice changes nothing.
//!
//! | Operation | Cache effect                                                  |
//! |-----------|---------------------------------------------------------------|
//! | create    | prepend to the global feed and the author's feed, if cached   |
//! | update    | replace by id in every feed                                   |
//! | like      | replace by id in every feed                                   |
//! | delete    | remove by id everywhere, then mark author feeds stale         |

use prayerline_core::cache::RetryPolicy;
use prayerline_core::{CacheKey, Error, GatewayError, NewPrayer, Prayer, PrayerGateway, QueryCache, ResourceKind};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Create,
    Update,
    Delete,
    Like,
}

impl MutationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MutationKind::Create => "create",
            MutationKind::Update => "update",
            MutationKind::Delete => "delete",
            MutationKind::Like => "like",
        }
    }
}

/// Lifecycle of the most recent mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationState {
    Idle,
    InFlight(MutationKind),
    Succeeded(MutationKind),
    Failed { kind: MutationKind, error: Error },
}

impl MutationState {
    pub fn is_in_flight(&self) -> bool {
        matches!(self, MutationState::InFlight(_))
    }
}

/// Reject content that is empty once surrounding whitespace is removed.
fn validate_content(content: &str) -> Result<&str, Error> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(Error::Validation("prayer content must not be empty".into()));
    }
    Ok(trimmed)
}

fn validate_id(id: &str) -> Result<(), Error> {
    if id.trim().is_empty() {
        return Err(Error::Validation("prayer id must not be empty".into()));
    }
    Ok(())
}

fn is_feed(key: &CacheKey) -> bool {
    key.kind == ResourceKind::Prayers
}

fn replace_by_id(list: &[Prayer], prayer: &Prayer) -> Option<Vec<Prayer>> {
    let position = list.iter().position(|p| p.id == prayer.id)?;
    if list[position] == *prayer {
        return None;
    }
    let mut next = list.to_vec();
    next[position] = prayer.clone();
    Some(next)
}

/// Write side of the prayer feeds.
pub struct PrayerMutations {
    gateway: Arc<dyn PrayerGateway>,
    cache: QueryCache<Vec<Prayer>>,
    retry: RetryPolicy,
    state: watch::Sender<MutationState>,
}

impl PrayerMutations {
    pub fn new(gateway: Arc<dyn PrayerGateway>, cache: QueryCache<Vec<Prayer>>, retry: RetryPolicy) -> Self {
        let (state, _) = watch::channel(MutationState::Idle);
        Self { gateway, cache, retry, state }
    }

    pub fn state(&self) -> MutationState {
        self.state.borrow().clone()
    }

    /// Follow state transitions of subsequent mutations.
    pub fn subscribe(&self) -> watch::Receiver<MutationState> {
        self.state.subscribe()
    }

    async fn perform<T, F, Fut>(&self, kind: MutationKind, op: F) -> Result<T, Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        self.state.send_replace(MutationState::InFlight(kind));
        self.retry.run(op).await.map_err(Error::write)
    }

    fn settle<T>(&self, kind: MutationKind, result: Result<T, Error>) -> Result<T, Error> {
        let next = match &result {
            Ok(_) => {
                tracing::info!(mutation = kind.as_str(), "mutation succeeded");
                MutationState::Succeeded(kind)
            }
            Err(error) => {
                tracing::warn!(mutation = kind.as_str(), error = %error, "mutation failed");
                MutationState::Failed { kind, error: error.clone() }
            }
        };
        self.state.send_replace(next);
        result
    }

    /// Create a prayer and prepend it to the cached feeds it belongs to.
    ///
    /// # Errors
    ///
    /// `Error::Validation` for blank content (the gateway is not called),
    /// `Error::Auth` or `Error::RemoteWrite` if the gateway rejects the write.
    pub async fn create(&self, mut input: NewPrayer) -> Result<Prayer, Error> {
        input.content = validate_content(&input.content)?.to_string();

        let result = self.perform(MutationKind::Create, || self.gateway.create_prayer(&input)).await;
        if let Ok(prayer) = &result {
            self.apply_created(prayer);
        }
        self.settle(MutationKind::Create, result)
    }

    /// Replace a prayer's content.
    ///
    /// # Errors
    ///
    /// Same as [`create`](Self::create).
    pub async fn update(&self, id: &str, content: &str) -> Result<Prayer, Error> {
        validate_id(id)?;
        let content = validate_content(content)?;

        let result = self.perform(MutationKind::Update, || self.gateway.update_prayer(id, content)).await;
        if let Ok(prayer) = &result {
            self.apply_updated(prayer);
        }
        self.settle(MutationKind::Update, result)
    }

    /// Delete a prayer and drop it from every cached feed.
    pub async fn delete(&self, id: &str) -> Result<(), Error> {
        validate_id(id)?;

        let result = self.perform(MutationKind::Delete, || self.gateway.delete_prayer(id)).await;
        if result.is_ok() {
            self.apply_deleted(id);
        }
        self.settle(MutationKind::Delete, result)
    }

    /// Like or unlike a prayer, storing the returned counters.
    pub async fn set_liked(&self, id: &str, liked: bool) -> Result<Prayer, Error> {
        validate_id(id)?;

        let result = self.perform(MutationKind::Like, || self.gateway.set_liked(id, liked)).await;
        if let Ok(prayer) = &result {
            self.apply_updated(prayer);
        }
        self.settle(MutationKind::Like, result)
    }

    /// Prepend `prayer` to the global feed and its author's feed. Feeds that
    /// were never loaded are left alone, as are feeds already holding it.
    pub fn apply_created(&self, prayer: &Prayer) -> usize {
        let global = CacheKey::prayers();
        let own = prayer.author_id.as_deref().map(CacheKey::prayers_by);
        let patched = self.cache.update_matching(
            |key| *key == global || own.as_ref() == Some(key),
            |list| {
                if list.iter().any(|p| p.id == prayer.id) {
                    return None;
                }
                Some(std::iter::once(prayer.clone()).chain(list.iter().cloned()).collect())
            },
        );
        tracing::debug!(id = %prayer.id, patched, "applied created prayer");
        patched
    }

    /// Replace `prayer` by id in every feed that contains it.
    pub fn apply_updated(&self, prayer: &Prayer) -> usize {
        let patched = self.cache.update_matching(is_feed, |list| replace_by_id(list, prayer));
        tracing::debug!(id = %prayer.id, patched, "applied updated prayer");
        patched
    }

    /// Remove `id` from every feed, then mark per-author feeds stale so
    /// derived counts are recomputed by the gateway.
    pub fn apply_deleted(&self, id: &str) -> usize {
        let patched = self.cache.update_matching(is_feed, |list| {
            if !list.iter().any(|p| p.id == id) {
                return None;
            }
            Some(list.iter().filter(|p| p.id != id).cloned().collect())
        });
        let invalidated = self
            .cache
            .invalidate_matching(|key| is_feed(key) && key.discriminator.is_some());
        tracing::debug!(id, patched, invalidated, "applied deleted prayer");
        patched
    }
}

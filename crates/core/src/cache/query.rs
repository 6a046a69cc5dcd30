//! Keyed query cache with request coalescing and stale-while-revalidate reads.
//!
//! - At most one fetch is in flight per key; concurrent callers share it.
//! - `read` is a synchronous peek that schedules a background refresh when
//!   the entry is missing, invalidated, or stale while observed.
//! - Every stored value carries a timestamp; a write older than the entry's
//!   current timestamp is discarded.
//! - Unobserved entries older than their GC window are evicted by
//!   `collect_garbage`.

use super::key::CacheKey;
use super::policy::{CachePolicy, PolicyTable};
use super::retry::RetryPolicy;
use crate::error::{Error, GatewayError};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::Instrument;

type SharedFetch<V> = Shared<BoxFuture<'static, Result<V, Error>>>;

/// Minimum gap between a failed load of a value-less entry and the next
/// fetch started by `read`.
const FAILED_LOAD_COOLDOWN: Duration = Duration::from_secs(1);

struct InFlight<V> {
    id: u64,
    future: SharedFetch<V>,
}

struct CacheEntry<V> {
    epoch: u64,
    data: Option<V>,
    updated_at: Option<Instant>,
    created_at: Instant,
    policy: CachePolicy,
    observers: usize,
    invalidated: bool,
    error: Option<Error>,
    failed_at: Option<Instant>,
    in_flight: Option<InFlight<V>>,
}

impl<V: Clone> CacheEntry<V> {
    fn new(epoch: u64, policy: CachePolicy, now: Instant) -> Self {
        Self {
            epoch,
            data: None,
            updated_at: None,
            created_at: now,
            policy,
            observers: 0,
            invalidated: false,
            error: None,
            failed_at: None,
            in_flight: None,
        }
    }

    fn is_stale(&self, now: Instant) -> bool {
        if self.invalidated {
            return true;
        }
        match self.updated_at {
            Some(at) => now.saturating_duration_since(at) > self.policy.stale_time,
            None => true,
        }
    }

    /// Nothing stored yet and no recent failed load to back off from.
    fn needs_load(&self, now: Instant) -> bool {
        self.data.is_none()
            && self
                .failed_at
                .is_none_or(|at| now.saturating_duration_since(at) >= FAILED_LOAD_COOLDOWN)
    }

    fn is_collectable(&self, now: Instant) -> bool {
        let since = self.updated_at.unwrap_or(self.created_at);
        self.observers == 0 && self.in_flight.is_none() && now.saturating_duration_since(since) > self.policy.gc_time
    }

    fn accept(&mut self, key: &CacheKey, value: V, stamp: Instant) -> Result<(), Error> {
        if let Some(current) = self.updated_at
            && stamp < current
        {
            return Err(Error::StaleWriteIgnored { key: key.to_string() });
        }
        self.data = Some(value);
        self.updated_at = Some(stamp);
        self.invalidated = false;
        self.error = None;
        self.failed_at = None;
        Ok(())
    }

    fn snapshot(&self, now: Instant) -> QuerySnapshot<V> {
        QuerySnapshot {
            data: self.data.clone(),
            is_stale: self.is_stale(now),
            is_fetching: self.in_flight.is_some(),
            error: self.error.clone(),
            updated_at: self.updated_at,
        }
    }
}

/// What a reader sees right now for one key.
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySnapshot<V> {
    /// Last successfully stored value, kept through failed refreshes.
    pub data: Option<V>,
    pub is_stale: bool,
    pub is_fetching: bool,
    /// Error of the most recent fetch, cleared by the next successful store.
    pub error: Option<Error>,
    pub updated_at: Option<Instant>,
}

impl<V> QuerySnapshot<V> {
    fn empty() -> Self {
        Self { data: None, is_stale: true, is_fetching: false, error: None, updated_at: None }
    }

    /// No value has been stored yet.
    pub fn is_pending(&self) -> bool {
        self.data.is_none()
    }
}

struct Inner<V> {
    entries: Mutex<HashMap<CacheKey, CacheEntry<V>>>,
    policies: PolicyTable,
    retry: RetryPolicy,
    ids: AtomicU64,
}

impl<V: Clone> Inner<V> {
    fn entries(&self) -> MutexGuard<'_, HashMap<CacheKey, CacheEntry<V>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_id(&self) -> u64 {
        self.ids.fetch_add(1, Ordering::Relaxed)
    }

    fn settle(&self, key: &CacheKey, epoch: u64, id: u64, started_at: Instant, result: &Result<V, Error>) {
        let mut entries = self.entries();
        let Some(entry) = entries.get_mut(key).filter(|e| e.epoch == epoch) else {
            tracing::debug!(%key, "entry evicted while fetching, dropping result");
            return;
        };
        if entry.in_flight.as_ref().is_some_and(|f| f.id == id) {
            entry.in_flight = None;
        }

        match result {
            Ok(value) => match entry.accept(key, value.clone(), started_at) {
                Ok(()) => tracing::debug!(%key, "query settled"),
                Err(err) => tracing::debug!(%key, error = %err, "newer write landed during fetch"),
            },
            Err(err) => {
                tracing::warn!(%key, error = %err, has_data = entry.data.is_some(), "query failed");
                entry.error = Some(err.clone());
                entry.failed_at = Some(Instant::now());
            }
        }
    }

    fn collect_garbage(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|key, entry| {
            let keep = !entry.is_collectable(now);
            if !keep {
                tracing::debug!(%key, "evicting unobserved entry");
            }
            keep
        });
        before - entries.len()
    }
}

/// Keyed store of fetched values of type `V`.
///
/// Cloning is cheap and yields a handle to the same store. Methods that may
/// start a fetch spawn it on the current tokio runtime.
pub struct QueryCache<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for QueryCache<V> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<V> QueryCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(policies: PolicyTable, retry: RetryPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(HashMap::new()),
                policies,
                retry,
                ids: AtomicU64::new(1),
            }),
        }
    }

    fn entry_mut<'a>(
        &self, entries: &'a mut HashMap<CacheKey, CacheEntry<V>>, key: &CacheKey, now: Instant,
    ) -> &'a mut CacheEntry<V> {
        entries.entry(key.clone()).or_insert_with(|| {
            let policy = self.inner.policies.policy_for(&key.kind);
            CacheEntry::new(self.inner.next_id(), policy, now)
        })
    }

    /// Current state for `key` without scheduling anything.
    pub fn peek(&self, key: &CacheKey) -> QuerySnapshot<V> {
        let now = Instant::now();
        self.inner
            .entries()
            .get(key)
            .map(|e| e.snapshot(now))
            .unwrap_or_else(QuerySnapshot::empty)
    }

    /// Stale-while-revalidate read.
    ///
    /// Returns immediately with whatever is cached. A background fetch is
    /// started when the entry has no value, was invalidated, or is stale and
    /// has at least one observer, unless a fetch is already in flight. After
    /// a failed load, a value-less entry is refetched once the cool-down has
    /// passed.
    pub fn read<F, Fut>(&self, key: &CacheKey, fetcher: F) -> QuerySnapshot<V>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, GatewayError>> + Send + 'static,
    {
        let now = Instant::now();
        let mut entries = self.inner.entries();
        let entry = self.entry_mut(&mut entries, key, now);

        let needs_fetch = entry.in_flight.is_none()
            && (entry.invalidated
                || entry.needs_load(now)
                || (entry.is_stale(now) && entry.observers > 0));

        if needs_fetch {
            tracing::debug!(%key, has_data = entry.data.is_some(), "scheduling background fetch");
            self.start_fetch(key, entry, fetcher, now);
        }

        entry.snapshot(now)
    }

    /// Get-or-fetch: the cached value if fresh, otherwise the result of the
    /// (possibly shared) in-flight fetch.
    pub async fn fetch<F, Fut>(&self, key: &CacheKey, fetcher: F) -> Result<V, Error>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, GatewayError>> + Send + 'static,
    {
        let pending = {
            let now = Instant::now();
            let mut entries = self.inner.entries();
            let entry = self.entry_mut(&mut entries, key, now);

            if let Some(in_flight) = &entry.in_flight {
                tracing::debug!(%key, "joining in-flight fetch");
                in_flight.future.clone()
            } else if !entry.is_stale(now)
                && let Some(data) = entry.data.clone()
            {
                tracing::debug!(%key, "cache hit");
                return Ok(data);
            } else {
                self.start_fetch(key, entry, fetcher, now)
            }
        };

        pending.await
    }

    fn start_fetch<F, Fut>(&self, key: &CacheKey, entry: &mut CacheEntry<V>, fetcher: F, now: Instant) -> SharedFetch<V>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, GatewayError>> + Send + 'static,
    {
        let id = self.inner.next_id();
        let epoch = entry.epoch;
        let retry = self.inner.retry;
        let weak: Weak<Inner<V>> = Arc::downgrade(&self.inner);
        let owned_key = key.clone();
        let span = tracing::debug_span!("query_fetch", key = %key, fetch_id = id);

        let future = async move {
            let result = retry.run(|| fetcher()).await.map_err(Error::read);
            if let Some(inner) = weak.upgrade() {
                inner.settle(&owned_key, epoch, id, now, &result);
            }
            result
        }
        .instrument(span)
        .boxed()
        .shared();

        entry.in_flight = Some(InFlight { id, future: future.clone() });
        tokio::spawn(future.clone());
        future
    }

    /// Cached value for `key`, fresh or not.
    pub fn get_data(&self, key: &CacheKey) -> Option<V> {
        self.inner.entries().get(key).and_then(|e| e.data.clone())
    }

    /// Apply `updater` to the cached value (or `default` when absent) and
    /// store the result as fresh. Never touches the network.
    pub fn write(&self, key: &CacheKey, default: V, updater: impl FnOnce(V) -> V) {
        let now = Instant::now();
        let mut entries = self.inner.entries();
        let entry = self.entry_mut(&mut entries, key, now);
        let current = entry.data.clone().unwrap_or(default);
        if let Err(err) = entry.accept(key, updater(current), now) {
            tracing::debug!(%key, error = %err, "write dropped");
        }
    }

    /// Store `value` stamped with `stamp`.
    ///
    /// # Errors
    ///
    /// Returns `Error::StaleWriteIgnored` and leaves the entry untouched if
    /// the entry already holds a value stamped later than `stamp`.
    pub fn write_at(&self, key: &CacheKey, value: V, stamp: Instant) -> Result<(), Error> {
        let mut entries = self.inner.entries();
        let entry = self.entry_mut(&mut entries, key, stamp);
        entry.accept(key, value, stamp)
    }

    /// Patch every cached value whose key satisfies `predicate`, under a
    /// single lock, so no reader observes a partially patched set.
    ///
    /// `patch` returns `None` to leave an entry (and its timestamp) as is.
    /// Entries without a value are skipped. Returns the number of entries
    /// patched.
    pub fn update_matching(
        &self, predicate: impl Fn(&CacheKey) -> bool, patch: impl Fn(&V) -> Option<V>,
    ) -> usize {
        let now = Instant::now();
        let mut entries = self.inner.entries();
        let mut patched = 0;
        for (key, entry) in entries.iter_mut().filter(|(k, _)| predicate(k)) {
            let Some(next) = entry.data.as_ref().and_then(&patch) else {
                continue;
            };
            match entry.accept(key, next, now) {
                Ok(()) => patched += 1,
                Err(err) => tracing::debug!(%key, error = %err, "patch dropped"),
            }
        }
        patched
    }

    /// Mark every entry under `prefix` stale. Returns the number marked.
    pub fn invalidate(&self, prefix: &CacheKey) -> usize {
        self.invalidate_matching(|key| key.matches(prefix))
    }

    pub fn invalidate_matching(&self, predicate: impl Fn(&CacheKey) -> bool) -> usize {
        let mut entries = self.inner.entries();
        let mut marked = 0;
        for (key, entry) in entries.iter_mut().filter(|(k, _)| predicate(k)) {
            tracing::debug!(%key, "invalidated");
            entry.invalidated = true;
            marked += 1;
        }
        marked
    }

    /// Register a live subscription on `key`; released when the guard drops.
    pub fn observe(&self, key: &CacheKey) -> QueryObserver<V> {
        let now = Instant::now();
        let mut entries = self.inner.entries();
        let entry = self.entry_mut(&mut entries, key, now);
        entry.observers += 1;
        QueryObserver { inner: Arc::downgrade(&self.inner), key: key.clone(), epoch: entry.epoch }
    }

    pub fn observer_count(&self, key: &CacheKey) -> usize {
        self.inner.entries().get(key).map_or(0, |e| e.observers)
    }

    pub fn is_fetching(&self, key: &CacheKey) -> bool {
        self.inner
            .entries()
            .get(key)
            .is_some_and(|e| e.in_flight.is_some())
    }

    /// Evict unobserved entries older than their GC window.
    pub fn collect_garbage(&self) -> usize {
        self.inner.collect_garbage()
    }

    /// Run `collect_garbage` every `every` until the cache is dropped.
    pub fn spawn_gc(&self, every: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let evicted = inner.collect_garbage();
                if evicted > 0 {
                    tracing::debug!(evicted, "query cache gc");
                }
            }
        })
    }

    pub fn len(&self) -> usize {
        self.inner.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry. In-flight fetches finish but their results are discarded.
    pub fn clear(&self) {
        self.inner.entries().clear();
    }
}

/// RAII observer registration returned by [`QueryCache::observe`].
pub struct QueryObserver<V: Clone> {
    inner: Weak<Inner<V>>,
    key: CacheKey,
    epoch: u64,
}

impl<V: Clone> QueryObserver<V> {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }
}

impl<V: Clone> Drop for QueryObserver<V> {
    fn drop(&mut self) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let mut entries = inner.entries();
        if let Some(entry) = entries.get_mut(&self.key).filter(|e| e.epoch == self.epoch) {
            entry.observers = entry.observers.saturating_sub(1);
        }
    }
}

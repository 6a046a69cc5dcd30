//! Per-user avatar state kept in step with host signals.
//!
//! Three signals drive an avatar:
//!
//! - `avatar-updated` re-resolves the URLs from the gateway. The previous
//!   URLs stay visible while the request is in flight and survive a failure.
//! - `avatar-preview-updated` shows a provisional image at every size at once.
//! - `avatar-final-updated` preloads the durable image, then commits it.
//!
//! Signals are handled one at a time in arrival order. A signal carrying the
//! same URL as the last applied one within the dedupe window is dropped.
//! A refresh that started before a preview or final was applied never
//! overwrites it.

use crate::preload::{ImageLoader, preload_with_timeout};
use prayerline_core::cache::RetryPolicy;
use prayerline_core::config::AppConfig;
use prayerline_core::debounce::{Fingerprint, should_apply};
use prayerline_core::events::Subscription;
use prayerline_core::{AvatarUrls, Error, PrayerGateway, Signal, SignalBus, SignalKind};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

/// What a view of one user's avatar shows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AvatarState {
    pub urls: Option<AvatarUrls>,
    /// A gateway refresh is in flight.
    pub is_loading: bool,
    /// Error of the last refresh; the URLs are left as they were.
    pub error: Option<Error>,
    /// Fingerprint of the last applied preview or final signal.
    pub last_event: Option<Fingerprint>,
}

#[derive(Debug, Clone, Copy)]
pub struct AvatarConfig {
    pub dedupe_window: Duration,
    pub preload_timeout: Duration,
    pub retry: RetryPolicy,
}

impl AvatarConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            dedupe_window: config.dedupe_window(),
            preload_timeout: config.preload_timeout(),
            retry: config.query_retry(),
        }
    }
}

impl Default for AvatarConfig {
    fn default() -> Self {
        Self {
            dedupe_window: Duration::from_millis(100),
            preload_timeout: Duration::from_secs(10),
            retry: RetryPolicy::queries(),
        }
    }
}

struct Record {
    state: watch::Sender<AvatarState>,
    /// Bumped on every commit; a refresh only lands if it is unchanged.
    generation: u64,
    /// Id of the refresh that owns `is_loading`, if one is in flight.
    refresh: Option<u64>,
    refresh_ids: u64,
}

impl Record {
    fn new() -> Self {
        let (state, _) = watch::channel(AvatarState::default());
        Self { state, generation: 0, refresh: None, refresh_ids: 0 }
    }

    fn last_event(&self) -> Option<Fingerprint> {
        self.state.borrow().last_event.clone()
    }

    /// Take ownership of the loading flag for a new refresh. Any refresh
    /// still in flight loses it.
    fn begin_refresh(&mut self) -> RefreshTicket {
        self.refresh_ids += 1;
        self.refresh = Some(self.refresh_ids);
        RefreshTicket { id: self.refresh_ids, generation: self.generation }
    }

    fn commit(&mut self, urls: AvatarUrls, event: Option<Fingerprint>) {
        self.generation += 1;
        self.state.send_modify(|s| {
            s.urls = Some(urls);
            s.error = None;
            if event.is_some() {
                s.last_event = event;
            }
        });
    }
}

#[derive(Debug, Clone, Copy)]
struct RefreshTicket {
    id: u64,
    generation: u64,
}

struct Inner {
    gateway: Arc<dyn PrayerGateway>,
    loader: Arc<dyn ImageLoader>,
    config: AvatarConfig,
    records: Mutex<HashMap<String, Record>>,
}

impl Inner {
    fn records(&self) -> MutexGuard<'_, HashMap<String, Record>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn handle(self: &Arc<Self>, signal: Signal) {
        match signal {
            Signal::AvatarUpdated { user_id } => {
                self.refresh(&user_id);
            }
            Signal::AvatarPreviewUpdated { user_id, timestamp, preview_url } => {
                self.apply_preview(&user_id, Fingerprint::new(timestamp, preview_url));
            }
            Signal::AvatarFinalUpdated { user_id, timestamp, new_photo_url } => {
                self.apply_final(&user_id, Fingerprint::new(timestamp, new_photo_url))
                    .await;
            }
        }
    }

    async fn resolve(&self, user_id: &str) -> Result<AvatarUrls, Error> {
        self.config
            .retry
            .run(|| self.gateway.resolve_avatar_urls(user_id))
            .await
            .map_err(Error::read)
    }

    /// Start a background refresh unless one is already running.
    fn refresh(self: &Arc<Self>, user_id: &str) -> bool {
        let ticket = {
            let mut records = self.records();
            let Some(record) = records.get_mut(user_id) else {
                tracing::debug!(user_id, "no avatar subscriber, ignoring refresh");
                return false;
            };
            if record.refresh.is_some() {
                tracing::debug!(user_id, "avatar refresh already in flight");
                return false;
            }
            let ticket = record.begin_refresh();
            record.state.send_modify(|s| s.is_loading = true);
            ticket
        };

        let inner = Arc::clone(self);
        let user_id = user_id.to_owned();
        tokio::spawn(async move {
            let result = inner.resolve(&user_id).await;
            inner.finish_refresh(&user_id, ticket, result);
        });
        true
    }

    fn finish_refresh(&self, user_id: &str, ticket: RefreshTicket, result: Result<AvatarUrls, Error>) {
        let mut records = self.records();
        let Some(record) = records.get_mut(user_id) else {
            return;
        };
        if record.refresh != Some(ticket.id) {
            tracing::debug!(user_id, "avatar refresh superseded by a newer one, discarding result");
            return;
        }
        record.refresh = None;

        match result {
            Ok(urls) if record.generation == ticket.generation => {
                tracing::debug!(user_id, "avatar refreshed");
                record.commit(urls, None);
                record.state.send_modify(|s| s.is_loading = false);
            }
            Ok(_) => {
                tracing::debug!(user_id, "newer avatar applied during refresh, discarding result");
                record.state.send_modify(|s| s.is_loading = false);
            }
            Err(err) => {
                tracing::warn!(user_id, error = %err, "avatar refresh failed, keeping previous urls");
                record.state.send_modify(|s| {
                    s.is_loading = false;
                    s.error = Some(err);
                });
            }
        }
    }

    fn apply_preview(&self, user_id: &str, event: Fingerprint) -> bool {
        let mut records = self.records();
        let Some(record) = records.get_mut(user_id) else {
            tracing::debug!(user_id, "no avatar subscriber, ignoring preview");
            return false;
        };
        if !should_apply(record.last_event().as_ref(), &event, self.config.dedupe_window) {
            tracing::debug!(user_id, url = %event.url, "duplicate avatar preview suppressed");
            return false;
        }
        record.commit(AvatarUrls::uniform(event.url.clone()), Some(event));
        true
    }

    async fn apply_final(&self, user_id: &str, event: Fingerprint) -> bool {
        {
            let records = self.records();
            let Some(record) = records.get(user_id) else {
                tracing::debug!(user_id, "no avatar subscriber, ignoring final");
                return false;
            };
            if !should_apply(record.last_event().as_ref(), &event, self.config.dedupe_window) {
                tracing::debug!(user_id, url = %event.url, "duplicate avatar final suppressed");
                return false;
            }
        }

        if let Err(err) = preload_with_timeout(&*self.loader, &event.url, self.config.preload_timeout).await {
            tracing::warn!(user_id, url = %event.url, error = %err, "avatar preload failed, committing anyway");
        }

        let mut records = self.records();
        let Some(record) = records.get_mut(user_id) else {
            return false;
        };
        record.commit(AvatarUrls::uniform(event.url.clone()), Some(event));
        true
    }
}

/// A queued signal. `done` is fired once it has been handled.
struct Job {
    signal: Signal,
    done: Option<oneshot::Sender<()>>,
}

async fn run_worker(inner: Arc<Inner>, mut jobs: mpsc::UnboundedReceiver<Job>) {
    while let Some(Job { signal, done }) = jobs.recv().await {
        inner.handle(signal).await;
        if let Some(done) = done {
            // The caller may have stopped waiting.
            let _ = done.send(());
        }
    }
    tracing::debug!("avatar signal worker stopped");
}

/// Avatar state for every subscribed user, fed by a [`SignalBus`].
pub struct AvatarSync {
    inner: Arc<Inner>,
    subscriptions: Vec<Subscription>,
    queue: Option<mpsc::UnboundedSender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl AvatarSync {
    /// Subscribe to avatar signals on `bus` and start the worker that
    /// applies them. Must be called within a tokio runtime.
    pub fn new(
        gateway: Arc<dyn PrayerGateway>, loader: Arc<dyn ImageLoader>, bus: &dyn SignalBus, config: AvatarConfig,
    ) -> Self {
        let inner = Arc::new(Inner { gateway, loader, config, records: Mutex::new(HashMap::new()) });
        let (tx, rx) = mpsc::unbounded_channel();

        let subscriptions = [SignalKind::AvatarUpdated, SignalKind::AvatarPreviewUpdated, SignalKind::AvatarFinalUpdated]
            .into_iter()
            .map(|kind| {
                let tx = tx.clone();
                bus.subscribe(
                    kind,
                    Arc::new(move |signal: &Signal| {
                        if tx.send(Job { signal: signal.clone(), done: None }).is_err() {
                            tracing::debug!(kind = kind.as_str(), "avatar worker gone, dropping signal");
                        }
                    }),
                )
            })
            .collect();

        let worker = tokio::spawn(run_worker(Arc::clone(&inner), rx));
        Self { inner, subscriptions, queue: Some(tx), worker: Some(worker) }
    }

    /// Follow `user_id`'s avatar. The first subscription for a user starts
    /// the initial resolve.
    pub fn subscribe(&self, user_id: &str) -> watch::Receiver<AvatarState> {
        let (receiver, created) = {
            let mut records = self.inner.records();
            match records.get(user_id) {
                Some(record) => (record.state.subscribe(), false),
                None => {
                    let record = Record::new();
                    let receiver = record.state.subscribe();
                    records.insert(user_id.to_owned(), record);
                    (receiver, true)
                }
            }
        };
        if created {
            self.inner.refresh(user_id);
        }
        receiver
    }

    pub fn state(&self, user_id: &str) -> Option<AvatarState> {
        self.inner
            .records()
            .get(user_id)
            .map(|r| r.state.borrow().clone())
    }

    /// Clear the displayed URLs and resolve them again, waiting for the
    /// result. Any refresh already in flight is superseded.
    pub async fn force_refresh(&self, user_id: &str) -> Result<AvatarUrls, Error> {
        let ticket = {
            let mut records = self.inner.records();
            let record = records.entry(user_id.to_owned()).or_insert_with(Record::new);
            record.generation += 1;
            let ticket = record.begin_refresh();
            record.state.send_modify(|s| {
                s.urls = None;
                s.error = None;
                s.is_loading = true;
            });
            ticket
        };

        let result = self.inner.resolve(user_id).await;
        self.inner.finish_refresh(user_id, ticket, result.clone());
        result
    }

    /// Apply a signal without going through the bus. It is queued behind
    /// signals already received and this waits until it has been handled.
    pub async fn apply(&self, signal: Signal) {
        let (done, handled) = oneshot::channel();
        let queued = self
            .queue
            .as_ref()
            .is_some_and(|queue| queue.send(Job { signal, done: Some(done) }).is_ok());
        if !queued || handled.await.is_err() {
            tracing::debug!("avatar worker gone, signal not applied");
        }
    }

    /// Unsubscribe from the bus and wait for queued signals to drain.
    pub async fn shutdown(mut self) {
        self.subscriptions.clear();
        self.queue = None;
        if let Some(worker) = self.worker.take()
            && let Err(err) = worker.await
        {
            tracing::warn!(error = %err, "avatar worker ended abnormally");
        }
    }
}

impl Drop for AvatarSync {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeGateway, FakeLoader};
    use prayerline_core::{GatewayError, LocalBus};

    const USER: &str = "u1";

    struct Harness {
        bus: LocalBus,
        gateway: Arc<FakeGateway>,
        loader: Arc<FakeLoader>,
        sync: AvatarSync,
    }

    fn harness() -> Harness {
        let bus = LocalBus::new();
        let gateway = Arc::new(FakeGateway::default());
        gateway.set_avatar(USER, sized("old"));
        let loader = Arc::new(FakeLoader::default());
        let sync = AvatarSync::new(gateway.clone(), loader.clone(), &bus, AvatarConfig::default());
        Harness { bus, gateway, loader, sync }
    }

    fn sized(name: &str) -> AvatarUrls {
        AvatarUrls {
            large: format!("https://cdn/{name}-l.jpg"),
            medium: format!("https://cdn/{name}-m.jpg"),
            small: format!("https://cdn/{name}-s.jpg"),
        }
    }

    fn preview(ts: i64, url: &str) -> Signal {
        Signal::AvatarPreviewUpdated { user_id: USER.into(), timestamp: ts, preview_url: url.into() }
    }

    fn finalized(ts: i64, url: &str) -> Signal {
        Signal::AvatarFinalUpdated { user_id: USER.into(), timestamp: ts, new_photo_url: url.into() }
    }

    fn updated() -> Signal {
        Signal::AvatarUpdated { user_id: USER.into() }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    fn state(h: &Harness) -> AvatarState {
        h.sync.state(USER).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_resolves_initial_urls() {
        let h = harness();
        let rx = h.sync.subscribe(USER);
        assert!(rx.borrow().is_loading);

        settle().await;
        let current = rx.borrow().clone();
        assert_eq!(current.urls, Some(sized("old")));
        assert!(!current.is_loading);
        assert_eq!(h.gateway.calls("avatar"), 1);

        let _again = h.sync.subscribe(USER);
        settle().await;
        assert_eq!(h.gateway.calls("avatar"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_keeps_previous_urls_while_loading() {
        let h = harness();
        h.sync.subscribe(USER);
        settle().await;

        h.gateway.set_delay(Duration::from_millis(500));
        h.gateway.set_avatar(USER, sized("new"));
        h.bus.publish(&updated());
        tokio::time::sleep(Duration::from_millis(100)).await;

        let during = state(&h);
        assert!(during.is_loading);
        assert_eq!(during.urls, Some(sized("old")));

        settle().await;
        let after = state(&h);
        assert!(!after.is_loading);
        assert_eq!(after.urls, Some(sized("new")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_keeps_urls() {
        let h = harness();
        h.sync.subscribe(USER);
        settle().await;

        h.gateway.fail("avatar", GatewayError::Auth("expired".into()), 1);
        h.bus.publish(&updated());
        settle().await;

        let current = state(&h);
        assert_eq!(current.urls, Some(sized("old")));
        assert!(matches!(current.error, Some(Error::Auth(_))));
        assert!(!current.is_loading);
        assert_eq!(h.gateway.calls("avatar"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_refresh_signals_coalesce() {
        let h = harness();
        h.sync.subscribe(USER);
        settle().await;

        h.gateway.set_delay(Duration::from_millis(500));
        for _ in 0..5 {
            h.bus.publish(&updated());
        }
        settle().await;
        assert_eq!(h.gateway.calls("avatar"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_preview_applies_to_every_size() {
        let h = harness();
        h.sync.subscribe(USER);
        settle().await;

        h.bus.publish(&preview(1_000, "https://cdn/preview.jpg"));
        settle().await;

        let current = state(&h);
        assert_eq!(current.urls, Some(AvatarUrls::uniform("https://cdn/preview.jpg")));
        assert_eq!(current.last_event, Some(Fingerprint::new(1_000, "https://cdn/preview.jpg")));
        assert!(h.loader.requested().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_preview_suppressed() {
        let h = harness();
        h.sync.subscribe(USER);
        settle().await;

        h.bus.publish(&preview(1_000, "https://cdn/a.jpg"));
        h.bus.publish(&preview(1_050, "https://cdn/a.jpg"));
        settle().await;
        assert_eq!(state(&h).last_event, Some(Fingerprint::new(1_000, "https://cdn/a.jpg")));

        h.bus.publish(&preview(1_200, "https://cdn/a.jpg"));
        settle().await;
        assert_eq!(state(&h).last_event, Some(Fingerprint::new(1_200, "https://cdn/a.jpg")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_final_matching_preview_within_window_is_dropped() {
        let h = harness();
        h.sync.subscribe(USER);
        settle().await;

        h.bus.publish(&preview(1_000, "https://cdn/a.jpg"));
        h.bus.publish(&finalized(1_040, "https://cdn/a.jpg"));
        settle().await;

        assert!(h.loader.requested().is_empty());
        assert_eq!(state(&h).last_event, Some(Fingerprint::new(1_000, "https://cdn/a.jpg")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_preview_then_final_never_blank() {
        let h = harness();
        let mut rx = h.sync.subscribe(USER);
        settle().await;
        rx.borrow_and_update();

        h.loader.set_delay(Duration::from_millis(300));
        let collector = tokio::spawn(async move {
            let mut seen = Vec::new();
            while rx.changed().await.is_ok() {
                let current = rx.borrow_and_update().clone();
                let done = current.urls == Some(AvatarUrls::uniform("https://cdn/final.jpg"));
                seen.push(current);
                if done {
                    break;
                }
            }
            seen
        });

        h.bus.publish(&preview(1_000, "https://cdn/preview.jpg"));
        h.bus.publish(&finalized(2_000, "https://cdn/final.jpg"));
        settle().await;

        let seen = collector.await.unwrap();
        assert!(!seen.is_empty());
        assert!(seen.iter().all(|s| s.urls.is_some()));
        assert_eq!(h.loader.requested(), ["https://cdn/final.jpg"]);
        assert_eq!(state(&h).urls, Some(AvatarUrls::uniform("https://cdn/final.jpg")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_final_committed_when_preload_fails() {
        let h = harness();
        h.sync.subscribe(USER);
        settle().await;

        h.loader.fail_on("https://cdn/broken.jpg");
        h.bus.publish(&finalized(5_000, "https://cdn/broken.jpg"));
        settle().await;

        assert_eq!(state(&h).urls, Some(AvatarUrls::uniform("https://cdn/broken.jpg")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_signals_applied_in_arrival_order() {
        let h = harness();
        h.sync.subscribe(USER);
        settle().await;

        h.loader.set_delay(Duration::from_millis(300));
        h.bus.publish(&finalized(1_000, "https://cdn/final.jpg"));
        h.bus.publish(&preview(1_500, "https://cdn/later-preview.jpg"));
        settle().await;

        assert_eq!(state(&h).urls, Some(AvatarUrls::uniform("https://cdn/later-preview.jpg")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_does_not_overwrite_newer_preview() {
        let h = harness();
        h.sync.subscribe(USER);
        settle().await;

        h.gateway.set_delay(Duration::from_millis(500));
        h.gateway.set_avatar(USER, sized("resolved"));
        h.bus.publish(&updated());
        tokio::time::sleep(Duration::from_millis(100)).await;
        h.bus.publish(&preview(1_000, "https://cdn/preview.jpg"));
        settle().await;

        let current = state(&h);
        assert_eq!(current.urls, Some(AvatarUrls::uniform("https://cdn/preview.jpg")));
        assert!(!current.is_loading);
    }

    #[tokio::test(start_paused = true)]
    async fn test_signals_for_other_users_ignored() {
        let h = harness();
        h.sync.subscribe(USER);
        settle().await;

        h.bus.publish(&Signal::AvatarPreviewUpdated {
            user_id: "u2".into(),
            timestamp: 1,
            preview_url: "https://cdn/other.jpg".into(),
        });
        settle().await;

        assert!(h.sync.state("u2").is_none());
        assert_eq!(state(&h).urls, Some(sized("old")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_refresh_clears_first() {
        let h = harness();
        h.sync.subscribe(USER);
        settle().await;

        h.gateway.set_delay(Duration::from_millis(500));
        h.gateway.set_avatar(USER, sized("forced"));
        let (result, during) = tokio::join!(h.sync.force_refresh(USER), async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            state(&h)
        });

        assert_eq!(result.unwrap(), sized("forced"));
        assert!(during.urls.is_none());
        assert!(during.is_loading);
        assert_eq!(state(&h).urls, Some(sized("forced")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_landing_during_force_refresh_is_discarded() {
        let h = harness();
        h.gateway.set_delay(Duration::from_millis(100));
        h.sync.subscribe(USER);
        tokio::time::sleep(Duration::from_millis(50)).await;

        h.gateway.set_delay(Duration::from_millis(500));
        h.gateway.set_avatar(USER, sized("forced"));
        let (result, during) = tokio::join!(h.sync.force_refresh(USER), async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            let during = state(&h);
            h.bus.publish(&updated());
            during
        });

        assert!(during.urls.is_none());
        assert!(during.is_loading);
        assert_eq!(result.unwrap(), sized("forced"));
        let after = state(&h);
        assert_eq!(after.urls, Some(sized("forced")));
        assert!(!after.is_loading);

        settle().await;
        assert_eq!(h.gateway.calls("avatar"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_bypasses_bus() {
        let h = harness();
        h.sync.subscribe(USER);
        settle().await;

        h.sync.apply(preview(1_000, "https://cdn/direct.jpg")).await;
        assert_eq!(state(&h).urls, Some(AvatarUrls::uniform("https://cdn/direct.jpg")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_waits_behind_queued_signals() {
        let h = harness();
        h.sync.subscribe(USER);
        settle().await;

        h.loader.set_delay(Duration::from_millis(300));
        h.bus.publish(&finalized(1_000, "https://cdn/final.jpg"));
        h.sync.apply(preview(1_500, "https://cdn/direct.jpg")).await;

        assert_eq!(h.loader.requested(), ["https://cdn/final.jpg"]);
        assert_eq!(state(&h).urls, Some(AvatarUrls::uniform("https://cdn/direct.jpg")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_unsubscribes() {
        let h = harness();
        assert_eq!(h.bus.handler_count(SignalKind::AvatarFinalUpdated), 1);

        h.sync.shutdown().await;
        assert_eq!(h.bus.handler_count(SignalKind::AvatarUpdated), 0);
        assert_eq!(h.bus.publish(&updated()), 0);
    }
}

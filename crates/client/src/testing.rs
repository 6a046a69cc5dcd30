//! In-memory gateway and image loader for tests.

use crate::preload::{ImageLoader, PreloadError};
use chrono::{DateTime, TimeZone, Utc};
use prayerline_core::{AvatarUrls, GatewayError, NewPrayer, Prayer, PrayerGateway};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

pub(crate) fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

pub(crate) fn prayer(id: &str, author: &str) -> Prayer {
    Prayer {
        id: id.to_string(),
        author_id: Some(author.to_string()),
        author_name: None,
        content: format!("prayer {id}"),
        is_anonymous: false,
        image_url: None,
        created_at: at(0),
        updated_at: at(0),
        like_count: 0,
        response_count: 0,
    }
}

pub(crate) fn ids(list: &[Prayer]) -> Vec<&str> {
    list.iter().map(|p| p.id.as_str()).collect()
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap()
}

/// Gateway backed by a vector, with call counters, scripted failures and an
/// optional per-call delay.
#[derive(Default)]
pub(crate) struct FakeGateway {
    prayers: Mutex<Vec<Prayer>>,
    avatars: Mutex<HashMap<String, AvatarUrls>>,
    calls: Mutex<HashMap<&'static str, usize>>,
    failures: Mutex<HashMap<&'static str, VecDeque<GatewayError>>>,
    delay: Mutex<Duration>,
    next_id: AtomicUsize,
}

impl FakeGateway {
    pub fn with_prayers(prayers: Vec<Prayer>) -> Self {
        let gateway = Self::default();
        gateway.next_id.store(prayers.len() + 1, Ordering::SeqCst);
        *lock(&gateway.prayers) = prayers;
        gateway
    }

    pub fn set_avatar(&self, user_id: &str, urls: AvatarUrls) {
        lock(&self.avatars).insert(user_id.to_string(), urls);
    }

    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = delay;
    }

    /// Fail the next `times` calls of `op` with `err`.
    pub fn fail(&self, op: &'static str, err: GatewayError, times: usize) {
        let mut failures = lock(&self.failures);
        let queue = failures.entry(op).or_default();
        queue.extend(std::iter::repeat_n(err, times));
    }

    pub fn calls(&self, op: &str) -> usize {
        lock(&self.calls).get(op).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        lock(&self.calls).values().sum()
    }

    pub fn stored(&self) -> Vec<Prayer> {
        lock(&self.prayers).clone()
    }

    async fn enter(&self, op: &'static str) -> Result<(), GatewayError> {
        *lock(&self.calls).entry(op).or_default() += 1;
        let delay = *lock(&self.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match lock(&self.failures).get_mut(op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn modify(&self, id: &str, f: impl FnOnce(&mut Prayer)) -> Result<Prayer, GatewayError> {
        let mut prayers = lock(&self.prayers);
        let prayer = prayers
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| GatewayError::NotFound(id.to_string()))?;
        f(prayer);
        Ok(prayer.clone())
    }
}

#[async_trait::async_trait]
impl PrayerGateway for FakeGateway {
    async fn create_prayer(&self, input: &NewPrayer) -> Result<Prayer, GatewayError> {
        self.enter("create").await?;
        let id = format!("P{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let prayer = Prayer {
            id,
            author_id: input.author_id.clone(),
            author_name: input.author_name.clone(),
            content: input.content.clone(),
            is_anonymous: input.is_anonymous,
            image_url: input.image_url.clone(),
            created_at: at(60),
            updated_at: at(60),
            like_count: 0,
            response_count: 0,
        };
        lock(&self.prayers).insert(0, prayer.clone());
        Ok(prayer)
    }

    async fn update_prayer(&self, id: &str, content: &str) -> Result<Prayer, GatewayError> {
        self.enter("update").await?;
        self.modify(id, |p| {
            p.content = content.to_string();
            p.updated_at = at(120);
        })
    }

    async fn delete_prayer(&self, id: &str) -> Result<(), GatewayError> {
        self.enter("delete").await?;
        lock(&self.prayers).retain(|p| p.id != id);
        Ok(())
    }

    async fn list_prayers(&self) -> Result<Vec<Prayer>, GatewayError> {
        self.enter("list").await?;
        Ok(self.stored())
    }

    async fn list_prayers_by_author(&self, author_id: &str) -> Result<Vec<Prayer>, GatewayError> {
        self.enter("list_by_author").await?;
        Ok(self
            .stored()
            .into_iter()
            .filter(|p| p.author_id.as_deref() == Some(author_id))
            .collect())
    }

    async fn set_liked(&self, id: &str, liked: bool) -> Result<Prayer, GatewayError> {
        self.enter("like").await?;
        self.modify(id, |p| {
            p.like_count = if liked { p.like_count + 1 } else { p.like_count.saturating_sub(1) };
        })
    }

    async fn resolve_avatar_urls(&self, user_id: &str) -> Result<AvatarUrls, GatewayError> {
        self.enter("avatar").await?;
        lock(&self.avatars)
            .get(user_id)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(user_id.to_string()))
    }
}

/// Image loader that records requested URLs and fails the ones it is told to.
#[derive(Default)]
pub(crate) struct FakeLoader {
    requested: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
    delay: Mutex<Duration>,
}

impl FakeLoader {
    pub fn fail_on(&self, url: &str) {
        lock(&self.failing).insert(url.to_string());
    }

    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = delay;
    }

    pub fn requested(&self) -> Vec<String> {
        lock(&self.requested).clone()
    }
}

#[async_trait::async_trait]
impl ImageLoader for FakeLoader {
    async fn preload(&self, url: &str) -> Result<(), PreloadError> {
        lock(&self.requested).push(url.to_string());
        let delay = *lock(&self.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if lock(&self.failing).contains(url) {
            return Err(PreloadError::Status(404));
        }
        Ok(())
    }
}

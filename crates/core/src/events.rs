//! Host signals and the bus they arrive on.
//!
//! Avatar changes are announced out of band rather than through the mutation
//! pipeline. Consumers depend on [`SignalBus`] only; [`LocalBus`] is the
//! in-process implementation.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Signal names, matching the `type` tag of the serialized signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    AvatarUpdated,
    AvatarPreviewUpdated,
    AvatarFinalUpdated,
}

impl SignalKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SignalKind::AvatarUpdated => "avatar-updated",
            SignalKind::AvatarPreviewUpdated => "avatar-preview-updated",
            SignalKind::AvatarFinalUpdated => "avatar-final-updated",
        }
    }
}

/// A host signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Signal {
    /// The stored avatar changed; re-resolve it.
    #[serde(rename_all = "camelCase")]
    AvatarUpdated { user_id: String },

    /// Provisional image for instant feedback.
    #[serde(rename_all = "camelCase")]
    AvatarPreviewUpdated {
        user_id: String,
        timestamp: i64,
        #[serde(rename = "previewURL")]
        preview_url: String,
    },

    /// Durable image URL.
    #[serde(rename_all = "camelCase")]
    AvatarFinalUpdated {
        user_id: String,
        timestamp: i64,
        #[serde(rename = "newPhotoURL")]
        new_photo_url: String,
    },
}

impl Signal {
    pub fn kind(&self) -> SignalKind {
        match self {
            Signal::AvatarUpdated { .. } => SignalKind::AvatarUpdated,
            Signal::AvatarPreviewUpdated { .. } => SignalKind::AvatarPreviewUpdated,
            Signal::AvatarFinalUpdated { .. } => SignalKind::AvatarFinalUpdated,
        }
    }

    pub fn user_id(&self) -> &str {
        match self {
            Signal::AvatarUpdated { user_id }
            | Signal::AvatarPreviewUpdated { user_id, .. }
            | Signal::AvatarFinalUpdated { user_id, .. } => user_id,
        }
    }
}

pub type SignalHandler = Arc<dyn Fn(&Signal) + Send + Sync>;

/// Publish/subscribe seam between signal producers and the caches.
pub trait SignalBus: Send + Sync {
    /// Register `handler` for `kind`. Dropping the returned subscription
    /// unregisters it.
    fn subscribe(&self, kind: SignalKind, handler: SignalHandler) -> Subscription;
}

/// Handle to a registered handler.
#[must_use = "dropping a subscription unsubscribes it"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self { cancel: Some(Box::new(cancel)) }
    }

    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    handlers: HashMap<SignalKind, Vec<(u64, SignalHandler)>>,
}

/// Synchronous in-process bus. Handlers run on the publisher's task, in
/// registration order.
#[derive(Clone, Default)]
pub struct LocalBus {
    registry: Arc<Mutex<Registry>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver `signal` to every handler of its kind. Returns the number of
    /// handlers invoked.
    pub fn publish(&self, signal: &Signal) -> usize {
        let handlers: Vec<SignalHandler> = self
            .registry()
            .handlers
            .get(&signal.kind())
            .map(|hs| hs.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();

        tracing::debug!(kind = signal.kind().as_str(), user_id = signal.user_id(), handlers = handlers.len(), "publish");
        for handler in &handlers {
            handler(signal);
        }
        handlers.len()
    }

    pub fn handler_count(&self, kind: SignalKind) -> usize {
        self.registry().handlers.get(&kind).map_or(0, Vec::len)
    }
}

impl SignalBus for LocalBus {
    fn subscribe(&self, kind: SignalKind, handler: SignalHandler) -> Subscription {
        let id = {
            let mut registry = self.registry();
            registry.next_id += 1;
            let id = registry.next_id;
            registry.handlers.entry(kind).or_default().push((id, handler));
            id
        };

        let registry = Arc::clone(&self.registry);
        Subscription::new(move || {
            let mut registry = registry.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(handlers) = registry.handlers.get_mut(&kind) {
                handlers.retain(|(hid, _)| *hid != id);
            }
        })
    }
}

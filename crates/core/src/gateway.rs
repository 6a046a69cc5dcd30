//! Remote gateway contract consumed by the cache layer.

use crate::error::GatewayError;
use crate::models::{AvatarUrls, NewPrayer, Prayer};

/// Async CRUD access to the remote document store.
///
/// Implementations report failures as [`GatewayError`] so the cache layer can
/// decide whether a retry is worthwhile.
#[async_trait::async_trait]
pub trait PrayerGateway: Send + Sync {
    async fn create_prayer(&self, input: &NewPrayer) -> Result<Prayer, GatewayError>;

    async fn update_prayer(&self, id: &str, content: &str) -> Result<Prayer, GatewayError>;

    async fn delete_prayer(&self, id: &str) -> Result<(), GatewayError>;

    async fn list_prayers(&self) -> Result<Vec<Prayer>, GatewayError>;

    async fn list_prayers_by_author(&self, author_id: &str) -> Result<Vec<Prayer>, GatewayError>;

    /// Like or unlike a prayer, returning it with updated counters.
    async fn set_liked(&self, id: &str, liked: bool) -> Result<Prayer, GatewayError>;

    async fn resolve_avatar_urls(&self, user_id: &str) -> Result<AvatarUrls, GatewayError>;
}

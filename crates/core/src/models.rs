//! Domain records exchanged with the remote gateway and held in the caches.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A prayer post as returned by the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prayer {
    pub id: String,
    pub author_id: Option<String>,
    #[serde(default)]
    pub author_name: Option<String>,
    pub content: String,
    #[serde(default)]
    pub is_anonymous: bool,
    #[serde(default)]
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub like_count: u32,
    #[serde(default)]
    pub response_count: u32,
}

/// Input for creating a prayer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPrayer {
    pub content: String,
    pub author_id: Option<String>,
    pub author_name: Option<String>,
    pub is_anonymous: bool,
    pub image_url: Option<String>,
}

impl NewPrayer {
    pub fn new(content: impl Into<String>) -> Self {
        Self { content: content.into(), ..Default::default() }
    }

    pub fn by(mut self, author_id: impl Into<String>) -> Self {
        self.author_id = Some(author_id.into());
        self
    }
}

/// The three resolutions an avatar is served at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvatarUrls {
    pub large: String,
    pub medium: String,
    pub small: String,
}

impl AvatarUrls {
    /// Use one URL for every size, as provisional and freshly committed
    /// uploads only exist at a single resolution.
    pub fn uniform(url: impl Into<String>) -> Self {
        let url = url.into();
        Self { large: url.clone(), medium: url.clone(), small: url }
    }

    pub fn is_uniform(&self) -> bool {
        self.large == self.medium && self.medium == self.small
    }
}

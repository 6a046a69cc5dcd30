//! Cache keys: a resource kind plus an optional discriminator.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical category of cached data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ResourceKind {
    Prayers,
    PrayerResponses,
    UserProfile,
    SocialFeatures,
    /// Any kind without a built-in policy. Resolves to the default policy.
    Other(String),
}

impl ResourceKind {
    pub fn as_str(&self) -> &str {
        match self {
            ResourceKind::Prayers => "prayers",
            ResourceKind::PrayerResponses => "prayer-responses",
            ResourceKind::UserProfile => "user-profile",
            ResourceKind::SocialFeatures => "social-features",
            ResourceKind::Other(name) => name,
        }
    }

    /// The kinds with a built-in policy.
    pub fn known() -> [ResourceKind; 4] {
        [
            ResourceKind::Prayers,
            ResourceKind::PrayerResponses,
            ResourceKind::UserProfile,
            ResourceKind::SocialFeatures,
        ]
    }
}

impl From<&str> for ResourceKind {
    fn from(value: &str) -> Self {
        match value {
            "prayers" => ResourceKind::Prayers,
            "prayer-responses" => ResourceKind::PrayerResponses,
            "user-profile" => ResourceKind::UserProfile,
            "social-features" => ResourceKind::SocialFeatures,
            other => ResourceKind::Other(other.to_string()),
        }
    }
}

impl From<String> for ResourceKind {
    fn from(value: String) -> Self {
        ResourceKind::from(value.as_str())
    }
}

impl From<ResourceKind> for String {
    fn from(kind: ResourceKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a cache slot. Compared by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub kind: ResourceKind,
    pub discriminator: Option<String>,
}

impl CacheKey {
    pub fn new(kind: ResourceKind) -> Self {
        Self { kind, discriminator: None }
    }

    pub fn with(kind: ResourceKind, discriminator: impl Into<String>) -> Self {
        Self { kind, discriminator: Some(discriminator.into()) }
    }

    /// Global prayer feed.
    pub fn prayers() -> Self {
        Self::new(ResourceKind::Prayers)
    }

    /// Prayers written by one author.
    pub fn prayers_by(author_id: impl Into<String>) -> Self {
        Self::with(ResourceKind::Prayers, author_id)
    }

    /// Prefix match: a key without a discriminator matches every key of its kind.
    pub fn matches(&self, prefix: &CacheKey) -> bool {
        if self.kind != prefix.kind {
            return false;
        }
        match &prefix.discriminator {
            None => true,
            Some(d) => self.discriminator.as_ref() == Some(d),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.discriminator {
            Some(d) => write!(f, "{}/{}", self.kind, d),
            None => write!(f, "{}", self.kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_kind_round_trip_names() {
        for kind in ResourceKind::known() {
            assert_eq!(ResourceKind::from(kind.as_str()), kind);
        }
        assert_eq!(ResourceKind::from("likes"), ResourceKind::Other("likes".into()));
    }

    #[test]
    fn test_keys_compare_by_value() {
        let mut map = HashMap::new();
        map.insert(CacheKey::prayers_by("u1"), 1);
        assert_eq!(map.get(&CacheKey::with(ResourceKind::Prayers, String::from("u1"))), Some(&1));
        assert!(map.get(&CacheKey::prayers_by("u2")).is_none());
    }

    #[test]
    fn test_prefix_matching() {
        let global = CacheKey::prayers();
        let author = CacheKey::prayers_by("u1");
        let profile = CacheKey::with(ResourceKind::UserProfile, "u1");

        assert!(global.matches(&global));
        assert!(author.matches(&global));
        assert!(!global.matches(&author));
        assert!(!profile.matches(&global));
        assert!(author.matches(&CacheKey::prayers_by("u1")));
    }

    #[test]
    fn test_display() {
        assert_eq!(CacheKey::prayers().to_string(), "prayers");
        assert_eq!(CacheKey::prayers_by("u1").to_string(), "prayers/u1");
    }
}

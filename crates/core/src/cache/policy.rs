//! Per-resource staleness and garbage-collection windows.

use super::key::ResourceKind;
use crate::config::ConfigError;
use std::collections::HashMap;
use std::time::Duration;

const MINUTE: u64 = 60;

/// Staleness and GC windows for one resource kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    /// Age after which a cached value is refetched on the next observed read.
    pub stale_time: Duration,
    /// Age after which an unobserved entry is evicted.
    pub gc_time: Duration,
}

impl CachePolicy {
    pub const fn from_secs(stale: u64, gc: u64) -> Self {
        Self { stale_time: Duration::from_secs(stale), gc_time: Duration::from_secs(gc) }
    }

    pub fn from_millis(stale_ms: u64, gc_ms: u64) -> Self {
        Self { stale_time: Duration::from_millis(stale_ms), gc_time: Duration::from_millis(gc_ms) }
    }

    /// An entry must never be evicted while still fresh.
    pub fn is_consistent(&self) -> bool {
        self.gc_time >= self.stale_time
    }
}

/// Fallback for kinds without a dedicated policy.
pub const DEFAULT_POLICY: CachePolicy = CachePolicy::from_secs(5 * MINUTE, 10 * MINUTE);

/// Feeds change often; keep them briefly.
pub const PRAYERS_POLICY: CachePolicy = CachePolicy::from_secs(2 * MINUTE, 10 * MINUTE);

pub const PRAYER_RESPONSES_POLICY: CachePolicy = CachePolicy::from_secs(MINUTE, 5 * MINUTE);

pub const USER_PROFILE_POLICY: CachePolicy = CachePolicy::from_secs(10 * MINUTE, 30 * MINUTE);

pub const SOCIAL_FEATURES_POLICY: CachePolicy = CachePolicy::from_secs(5 * MINUTE, 15 * MINUTE);

/// Lookup table from resource kind to policy.
#[derive(Debug, Clone)]
pub struct PolicyTable {
    default: CachePolicy,
    overrides: HashMap<ResourceKind, CachePolicy>,
}

impl Default for PolicyTable {
    fn default() -> Self {
        let overrides = HashMap::from([
            (ResourceKind::Prayers, PRAYERS_POLICY),
            (ResourceKind::PrayerResponses, PRAYER_RESPONSES_POLICY),
            (ResourceKind::UserProfile, USER_PROFILE_POLICY),
            (ResourceKind::SocialFeatures, SOCIAL_FEATURES_POLICY),
        ]);
        Self { default: DEFAULT_POLICY, overrides }
    }
}

impl PolicyTable {
    /// Start from the built-in table with a different fallback.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if the GC window is shorter than the
    /// staleness window.
    pub fn with_default(default: CachePolicy) -> Result<Self, ConfigError> {
        check("default", &default)?;
        Ok(Self { default, ..Self::default() })
    }

    /// Replace the policy for one kind.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if the GC window is shorter than the
    /// staleness window.
    pub fn set(&mut self, kind: ResourceKind, policy: CachePolicy) -> Result<(), ConfigError> {
        check(kind.as_str(), &policy)?;
        self.overrides.insert(kind, policy);
        Ok(())
    }

    pub fn policy_for(&self, kind: &ResourceKind) -> CachePolicy {
        self.overrides.get(kind).copied().unwrap_or(self.default)
    }

    pub fn default_policy(&self) -> CachePolicy {
        self.default
    }
}

fn check(name: &str, policy: &CachePolicy) -> Result<(), ConfigError> {
    if policy.is_consistent() {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            field: format!("policies.{name}"),
            reason: format!(
                "gc window ({}ms) must be at least the staleness window ({}ms)",
                policy.gc_time.as_millis(),
                policy.stale_time.as_millis()
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_kind_gc_covers_staleness() {
        let table = PolicyTable::default();
        for kind in ResourceKind::known() {
            let policy = table.policy_for(&kind);
            assert!(policy.is_consistent(), "{kind} evicts before going stale");
        }
        assert!(table.default_policy().is_consistent());
    }

    #[test]
    fn test_unknown_kind_falls_back() {
        let table = PolicyTable::default();
        let policy = table.policy_for(&ResourceKind::Other("likes".into()));
        assert_eq!(policy, DEFAULT_POLICY);
    }

    #[test]
    fn test_lookup_is_deterministic() {
        let table = PolicyTable::default();
        assert_eq!(table.policy_for(&ResourceKind::Prayers), table.policy_for(&ResourceKind::Prayers));
        assert_eq!(table.policy_for(&ResourceKind::Prayers), PRAYERS_POLICY);
    }

    #[test]
    fn test_set_rejects_inverted_windows() {
        let mut table = PolicyTable::default();
        let result = table.set(ResourceKind::Prayers, CachePolicy::from_secs(600, 60));
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "policies.prayers"));
        assert_eq!(table.policy_for(&ResourceKind::Prayers), PRAYERS_POLICY);
    }

    #[test]
    fn test_set_accepts_equal_windows() {
        let mut table = PolicyTable::default();
        table
            .set(ResourceKind::SocialFeatures, CachePolicy::from_secs(30, 30))
            .unwrap();
        assert_eq!(table.policy_for(&ResourceKind::SocialFeatures), CachePolicy::from_secs(30, 30));
    }

    #[test]
    fn test_with_default_rejects_inverted() {
        assert!(PolicyTable::with_default(CachePolicy::from_millis(1000, 10)).is_err());
        let table = PolicyTable::with_default(CachePolicy::from_millis(10, 1000)).unwrap();
        assert_eq!(table.policy_for(&ResourceKind::Other("x".into())), CachePolicy::from_millis(10, 1000));
    }
}

//! Duplicate suppression by event fingerprint.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Identity of an applied event: when it was emitted and what it carried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    /// Emitter timestamp in milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    pub url: String,
}

impl Fingerprint {
    pub fn new(timestamp_ms: i64, url: impl Into<String>) -> Self {
        Self { timestamp_ms, url: url.into() }
    }
}

/// Whether `next` should be applied given the last applied fingerprint.
///
/// An event is a duplicate when it carries the same URL as the last one and
/// was emitted less than `window` apart, in either direction.
pub fn should_apply(last: Option<&Fingerprint>, next: &Fingerprint, window: Duration) -> bool {
    let Some(last) = last else {
        return true;
    };
    if last.url != next.url {
        return true;
    }
    let gap = next.timestamp_ms.abs_diff(last.timestamp_ms);
    u128::from(gap) >= window.as_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(100);

    #[test]
    fn test_first_event_applies() {
        assert!(should_apply(None, &Fingerprint::new(1_000, "a"), WINDOW));
    }

    #[test]
    fn test_same_url_within_window_suppressed() {
        let last = Fingerprint::new(1_000, "a");
        assert!(!should_apply(Some(&last), &Fingerprint::new(1_000, "a"), WINDOW));
        assert!(!should_apply(Some(&last), &Fingerprint::new(1_099, "a"), WINDOW));
        assert!(!should_apply(Some(&last), &Fingerprint::new(950, "a"), WINDOW));
    }

    #[test]
    fn test_same_url_outside_window_applies() {
        let last = Fingerprint::new(1_000, "a");
        assert!(should_apply(Some(&last), &Fingerprint::new(1_100, "a"), WINDOW));
        assert!(should_apply(Some(&last), &Fingerprint::new(5_000, "a"), WINDOW));
    }

    #[test]
    fn test_different_url_always_applies() {
        let last = Fingerprint::new(1_000, "a");
        assert!(should_apply(Some(&last), &Fingerprint::new(1_000, "b"), WINDOW));
    }
}

//! Staleness rule for lock entries.

use std::time::Duration;

/// Minimum age before a lock entry may be reclaimed.
pub const STALE_AFTER: Duration = Duration::from_secs(30);

/// A holder whose last activity heartbeat is younger than this keeps its lock.
pub const ACTIVITY_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StalenessPolicy {
    pub stale_after: Duration,
    pub activity_window: Duration,
}

impl Default for StalenessPolicy {
    fn default() -> Self {
        Self {
            stale_after: STALE_AFTER,
            activity_window: ACTIVITY_WINDOW,
        }
    }
}

impl StalenessPolicy {
    /// A lock is stale when it is older than `stale_after` AND its holder has
    /// no heartbeat younger than `activity_window`.
    ///
    /// `heartbeat_age_ms` is `None` when no heartbeat could be observed.
    pub fn is_stale(&self, lock_age_ms: u64, heartbeat_age_ms: Option<u64>) -> bool {
        let old = lock_age_ms > duration_ms(self.stale_after);
        let idle = heartbeat_age_ms.is_none_or(|age| age > duration_ms(self.activity_window));
        old && idle
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn young_lock_with_recent_activity_is_live() {
        let policy = StalenessPolicy::default();
        assert!(!policy.is_stale(5_000, Some(1_000)));
    }

    #[test]
    fn old_lock_without_recent_activity_is_stale() {
        let policy = StalenessPolicy::default();
        assert!(policy.is_stale(90_000, Some(70_000)));
        assert!(policy.is_stale(90_000, None));
    }

    #[test]
    fn old_lock_with_recent_activity_is_live() {
        // Long-running attach in a window the user is still working in.
        let policy = StalenessPolicy::default();
        assert!(!policy.is_stale(90_000, Some(10_000)));
    }

    #[test]
    fn young_lock_without_heartbeat_is_live() {
        let policy = StalenessPolicy::default();
        assert!(!policy.is_stale(10_000, None));
    }

    #[test]
    fn threshold_is_exclusive() {
        let policy = StalenessPolicy::default();
        assert!(!policy.is_stale(30_000, None));
        assert!(policy.is_stale(30_001, None));
        assert!(!policy.is_stale(30_001, Some(60_000)));
    }

    proptest! {
        #[test]
        fn never_stale_below_threshold(age in 0u64..=30_000, hb in proptest::option::of(0u64..1_000_000)) {
            prop_assert!(!StalenessPolicy::default().is_stale(age, hb));
        }

        #[test]
        fn always_stale_above_threshold_when_idle(age in 30_001u64..10_000_000, hb in proptest::option::of(60_001u64..10_000_000)) {
            prop_assert!(StalenessPolicy::default().is_stale(age, hb));
        }
    }
}

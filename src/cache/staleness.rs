//! Staleness rules
//!
//! Two windows measured from `last_update_at`: the hard window bounds what
//! may be served, the soft window (hard minus refresh interval) tells the
//! refresher what to pick up before it goes hard-stale.

use std::time::Duration;

use super::node::{CacheDescription, Status};
use super::CacheError;

#[derive(Debug, Clone, Copy)]
pub struct StalenessPolicy {
    /// Download URL validity; nodes older than this are not served
    pub hard_window: Duration,
    pub refresh_interval: Duration,
    /// How long a node may sit in `Caching` before it is retried
    pub caching_timeout: Duration,
}

impl Default for StalenessPolicy {
    fn default() -> Self {
        Self {
            hard_window: Duration::from_secs(3600),
            refresh_interval: Duration::from_secs(300),
            caching_timeout: Duration::from_secs(120),
        }
    }
}

impl StalenessPolicy {
    pub fn new(hard_window: Duration, refresh_interval: Duration, caching_timeout: Duration) -> Self {
        Self {
            hard_window,
            refresh_interval,
            caching_timeout,
        }
    }

    fn soft_window(&self) -> i64 {
        self.hard_window.saturating_sub(self.refresh_interval).as_secs() as i64
    }

    /// Whether a node with this description may be served at `now`
    pub fn check_servable(&self, description: &CacheDescription, now: i64) -> Result<(), CacheError> {
        let path = &description.path;
        match description.status {
            Status::Wait | Status::Caching => Err(CacheError::CacheMiss { path: path.clone() }),
            Status::Failed => Err(CacheError::UpstreamFailed {
                path: path.clone(),
                reason: "last refresh failed".to_string(),
            }),
            Status::Cached | Status::Force => {
                if now - description.last_update_at > self.hard_window.as_secs() as i64 {
                    Err(CacheError::CacheExpired { path: path.clone() })
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Whether the refresher should pick this node up at `now`
    pub fn needs_update(&self, description: &CacheDescription, now: i64) -> bool {
        match description.status {
            Status::Wait | Status::Failed | Status::Force => true,
            Status::Caching => self.caching_timed_out(description, now),
            Status::Cached => now - description.last_update_at > self.soft_window(),
        }
    }

    /// A populate stuck in `Caching` past the timeout counts as abandoned
    pub fn caching_timed_out(&self, description: &CacheDescription, now: i64) -> bool {
        match (description.status, description.caching_since) {
            (Status::Caching, Some(since)) => now - since > self.caching_timeout.as_secs() as i64,
            (Status::Caching, None) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn described(status: Status, last_update_at: i64) -> CacheDescription {
        CacheDescription::new("/drive/root:/a", status, last_update_at)
    }

    #[test]
    fn test_placeholders_are_misses() {
        let policy = StalenessPolicy::default();
        let wait = described(Status::Wait, 0);
        assert!(matches!(policy.check_servable(&wait, 10), Err(CacheError::CacheMiss { .. })));
        assert!(policy.needs_update(&wait, 10));
    }

    #[test]
    fn test_soft_due_before_hard_expiry() {
        let policy = StalenessPolicy::default();
        let node = described(Status::Cached, 1_000);

        // Inside the soft window: servable and not due
        assert!(policy.check_servable(&node, 1_000 + 3000).is_ok());
        assert!(!policy.needs_update(&node, 1_000 + 3000));

        // Past soft, inside hard: still servable but due
        assert!(policy.check_servable(&node, 1_000 + 3301).is_ok());
        assert!(policy.needs_update(&node, 1_000 + 3301));

        // Past hard
        assert!(matches!(
            policy.check_servable(&node, 1_000 + 3601),
            Err(CacheError::CacheExpired { .. })
        ));
    }

    #[test]
    fn test_failed_is_due_but_not_servable() {
        let policy = StalenessPolicy::default();
        let node = described(Status::Failed, 1_000);
        assert!(matches!(
            policy.check_servable(&node, 1_001),
            Err(CacheError::UpstreamFailed { .. })
        ));
        assert!(policy.needs_update(&node, 1_001));
    }

    #[test]
    fn test_force_is_servable_and_due() {
        let policy = StalenessPolicy::default();
        let node = described(Status::Force, 1_000);
        assert!(policy.check_servable(&node, 1_001).is_ok());
        assert!(policy.needs_update(&node, 1_001));
    }

    #[test]
    fn test_caching_timeout() {
        let policy = StalenessPolicy::default();
        let mut node = described(Status::Caching, 1_000);
        node.caching_since = Some(2_000);
        assert!(!policy.needs_update(&node, 2_100));
        assert!(policy.needs_update(&node, 2_121));
    }
}

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};

use crate::constants::{BLOCK_MINUTES, BLOCK_THRESHOLD, LONG_BLOCK};

/// Process-local mutable state shared across request handlers. The fields
/// are accessed independently, so each carries its own lock; concurrent
/// login failures may over-advance a counter, which errs toward blocking.
#[derive(Default)]
pub struct Session {
    /// Consecutive login failures per peer host.
    pub auth_counter: Mutex<HashMap<String, u32>>,
    /// Fast-path set of currently blocked peer hosts.
    pub forbid: Mutex<HashSet<String>>,
    /// Last logged request path per peer host. A `None` value marks a host
    /// that has connected but not had a path logged yet.
    pub info: Mutex<HashMap<String, Option<String>>>,
    /// Host identities accepted by the origin firewall. Swapped atomically
    /// by the refresher; readers take a snapshot under the read lock.
    pub allowed_origins: RwLock<HashSet<String>>,
}

impl Session {
    pub fn new(allowed_origins: HashSet<String>) -> Self {
        Self {
            allowed_origins: RwLock::new(allowed_origins),
            ..Default::default()
        }
    }

    /// True exactly once per host for the lifetime of the process.
    pub async fn first_contact(&self, host: &str) -> bool {
        let mut info = self.info.lock().await;
        if info.contains_key(host) {
            false
        } else {
            info.insert(host.to_string(), None);
            true
        }
    }

    /// Only log `METHOD PATH` when the path differs from the last one logged
    /// for this host. Keeps streaming clients from flooding the log.
    pub async fn should_log(&self, host: &str, path: &str) -> bool {
        let mut info = self.info.lock().await;
        match info.get(host) {
            Some(Some(last)) if last == path => false,
            _ => {
                info.insert(host.to_string(), Some(path.to_string()));
                true
            }
        }
    }

    /// Advance the failure counter for a host; once it crosses the block
    /// threshold the host also lands in the forbid set. Returns the new
    /// counter value.
    pub async fn record_login_failure(&self, host: &str) -> u32 {
        let count = {
            let mut counters = self.auth_counter.lock().await;
            let count = counters.entry(host.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        if count >= BLOCK_THRESHOLD {
            self.forbid.lock().await.insert(host.to_string());
        }
        count
    }

    /// Drop all failure state for a host. Returns whether there was any.
    pub async fn clear_login_failures(&self, host: &str) -> bool {
        let had_counter = self.auth_counter.lock().await.remove(host).is_some();
        let was_forbidden = self.forbid.lock().await.remove(host);
        had_counter || was_forbidden
    }
}

/// Block duration for a failure counter at or past the threshold. Escalates
/// through the minute table for counters 4..=9; from 10 on the host is out
/// for thirty days.
pub fn block_duration(counter: u32) -> Duration {
    if counter >= 10 {
        return LONG_BLOCK;
    }
    BLOCK_MINUTES
        .iter()
        .find(|(c, _)| *c == counter)
        .map(|(_, minutes)| Duration::from_secs(minutes * 60))
        .unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_durations_strictly_increase() {
        for counter in 4..=9 {
            assert!(
                block_duration(counter + 1) > block_duration(counter),
                "duration must increase at counter {counter}"
            );
        }
    }

    #[test]
    fn test_counter_ten_gets_thirty_days() {
        assert_eq!(block_duration(10), Duration::from_secs(30 * 24 * 60 * 60));
        assert_eq!(block_duration(37), block_duration(10));
        assert_eq!(block_duration(4), Duration::from_secs(5 * 60));
    }

    #[tokio::test]
    async fn test_failures_below_threshold_do_not_forbid() {
        let session = Session::default();
        for expected in 1..=3 {
            assert_eq!(session.record_login_failure("1.2.3.4").await, expected);
        }
        assert!(!session.forbid.lock().await.contains("1.2.3.4"));

        assert_eq!(session.record_login_failure("1.2.3.4").await, 4);
        assert!(session.forbid.lock().await.contains("1.2.3.4"));
    }

    #[tokio::test]
    async fn test_clear_removes_counter_and_forbid() {
        let session = Session::default();
        for _ in 0..5 {
            session.record_login_failure("1.2.3.4").await;
        }
        assert!(session.clear_login_failures("1.2.3.4").await);
        assert!(!session.forbid.lock().await.contains("1.2.3.4"));
        assert!(!session.auth_counter.lock().await.contains_key("1.2.3.4"));
        // A second clear is a no-op
        assert!(!session.clear_login_failures("1.2.3.4").await);
    }

    #[tokio::test]
    async fn test_first_contact_and_path_dedup() {
        let session = Session::default();
        assert!(session.first_contact("1.2.3.4").await);
        assert!(!session.first_contact("1.2.3.4").await);

        assert!(session.should_log("1.2.3.4", "/api/resources").await);
        assert!(!session.should_log("1.2.3.4", "/api/resources").await);
        assert!(session.should_log("1.2.3.4", "/api/raw/video.mkv").await);
    }
}

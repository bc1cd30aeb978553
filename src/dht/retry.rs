//! Deferred receive retries
//!
//! MOD, DEL, and LINK receives require a precondition record the node may
//! not hold yet (gossip is unordered). Such messages are parked keyed by the
//! missing hash and replayed through the normal dispatcher once the record
//! shows up, with bounded attempts and a TTL.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::dht::StatusMask;
use crate::hash::Hash;
use crate::message::Message;

/// Retry policy knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts before a parked message is dropped.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Spacing between sweeps, in milliseconds.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Parked messages older than this are dropped, in milliseconds.
    #[serde(default = "default_ttl_ms")]
    pub ttl_ms: u64,
}

fn default_max_attempts() -> u32 { 5 }
fn default_interval_ms() -> u64 { 10_000 }
fn default_ttl_ms() -> u64 { 300_000 }

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: default_max_attempts(),
            interval_ms: default_interval_ms(),
            ttl_ms: default_ttl_ms(),
        }
    }
}

impl RetryConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

struct Parked {
    missing: Hash,
    mask: StatusMask,
    msg: Message,
    attempts: u32,
    parked_at: Instant,
}

/// Queue of receives waiting for their precondition record.
pub struct RetryQueue {
    cfg: RetryConfig,
    parked: Mutex<Vec<Parked>>,
}

impl RetryQueue {
    pub fn new(cfg: RetryConfig) -> Self {
        RetryQueue {
            cfg,
            parked: Mutex::new(Vec::new()),
        }
    }

    /// Park a message until `missing` exists with a status in `mask`.
    pub fn park(&self, missing: Hash, mask: StatusMask, msg: Message) {
        debug!(%missing, kind = msg.body.kind(), "don't yet have hash, trying again later");
        let mut parked = self.parked.lock().expect("retry queue poisoned");
        parked.push(Parked {
            missing,
            mask,
            msg,
            attempts: 0,
            parked_at: Instant::now(),
        });
    }

    /// One sweep: messages whose precondition now holds are removed and
    /// returned for re-dispatch; the rest burn an attempt, and exhausted or
    /// expired ones are dropped.
    pub fn sweep(&self, ready: impl Fn(&Hash, StatusMask) -> bool) -> Vec<Message> {
        let ttl = Duration::from_millis(self.cfg.ttl_ms);
        let mut due = Vec::new();
        let mut parked = self.parked.lock().expect("retry queue poisoned");
        parked.retain_mut(|item| {
            if ready(&item.missing, item.mask) {
                due.push(item.msg.clone());
                return false;
            }
            item.attempts += 1;
            if item.attempts >= self.cfg.max_attempts {
                warn!(missing = %item.missing, kind = item.msg.body.kind(),
                      "dropping parked message after {} attempts", item.attempts);
                return false;
            }
            if item.parked_at.elapsed() > ttl {
                warn!(missing = %item.missing, kind = item.msg.body.kind(),
                      "dropping parked message past TTL");
                return false;
            }
            true
        });
        due
    }

    pub fn len(&self) -> usize {
        self.parked.lock().expect("retry queue poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::HashSpec;
    use crate::message::{MsgBody, PutReq};
    use libp2p_identity::PeerId;

    fn h(s: &str) -> Hash {
        HashSpec::default().sum(s.as_bytes()).unwrap()
    }

    fn msg(s: &str) -> Message {
        Message {
            from: PeerId::random(),
            body: MsgBody::PutReq(PutReq { h: h(s) }),
        }
    }

    #[test]
    fn test_sweep_releases_when_ready() {
        let queue = RetryQueue::new(RetryConfig::default());
        queue.park(h("missing"), StatusMask::ANY, msg("m"));

        assert!(queue.sweep(|_, _| false).is_empty());
        assert_eq!(queue.len(), 1);

        let due = queue.sweep(|_, _| true);
        assert_eq!(due.len(), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_attempts_are_bounded() {
        let queue = RetryQueue::new(RetryConfig {
            max_attempts: 3,
            ..RetryConfig::default()
        });
        queue.park(h("missing"), StatusMask::ANY, msg("m"));

        assert!(queue.sweep(|_, _| false).is_empty()); // attempt 1
        assert!(queue.sweep(|_, _| false).is_empty()); // attempt 2
        assert!(queue.sweep(|_, _| false).is_empty()); // attempt 3: dropped
        assert!(queue.is_empty());
    }

    #[test]
    fn test_ttl_drops_stale_messages() {
        let queue = RetryQueue::new(RetryConfig {
            max_attempts: 100,
            ttl_ms: 0,
            ..RetryConfig::default()
        });
        queue.park(h("missing"), StatusMask::ANY, msg("m"));
        std::thread::sleep(Duration::from_millis(5));
        assert!(queue.sweep(|_, _| false).is_empty());
        assert!(queue.is_empty());
    }
}

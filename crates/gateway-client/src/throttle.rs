//! Identify admission
//!
//! One logical rate-limit gate shared by every shard in the fleet. The
//! server allows `max_concurrency` identify buckets; shards map onto a
//! bucket by `shard_id % max_concurrency`, and successive identifies from
//! the same bucket must be spaced by at least the identify interval.

use gateway_protocol::ShardId;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Minimum spacing between identifies sharing a bucket
pub const IDENTIFY_INTERVAL: Duration = Duration::from_secs(5);

/// Serializes identify attempts fleet-wide
///
/// Admission works by time-slot reservation: a caller atomically claims the
/// bucket's next free slot under the lock, then sleeps until its slot
/// arrives. No lock is held across the sleep, and slots for one bucket are
/// spaced by at least [`IDENTIFY_INTERVAL`], so with `max_concurrency = 1`
/// at most one identify is in flight at a time.
#[derive(Debug)]
pub struct IdentifyThrottle {
    max_concurrency: u32,
    interval: Duration,
    next_slot: Mutex<HashMap<u32, Instant>>,
}

impl IdentifyThrottle {
    /// Create a throttle for the given concurrency limit
    #[must_use]
    pub fn new(max_concurrency: u32) -> Self {
        Self::with_interval(max_concurrency, IDENTIFY_INTERVAL)
    }

    /// Create a throttle with an explicit identify interval
    #[must_use]
    pub fn with_interval(max_concurrency: u32, interval: Duration) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
            interval,
            next_slot: Mutex::new(HashMap::new()),
        }
    }

    /// Configured concurrency limit
    #[must_use]
    pub fn max_concurrency(&self) -> u32 {
        self.max_concurrency
    }

    /// Wait until this shard is allowed to send its identify
    pub async fn wait_for_identify(&self, shard_id: ShardId) {
        let key = shard_id % self.max_concurrency;

        let slot = {
            let mut slots = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = slots.get(&key).copied().map_or(now, |at| at.max(now));
            slots.insert(key, slot + self.interval);
            slot
        };

        tokio::time::sleep_until(slot).await;
    }
}

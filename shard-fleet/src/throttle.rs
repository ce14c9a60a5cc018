use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio::time::sleep_until;

/// Minimum time between two identifies on the same concurrency key.
pub const IDENTIFY_INTERVAL: Duration = Duration::from_secs(5);

/// Spaces out identifies the way the gateway requires.
///
/// Shards share a key when their ids are equal modulo `max_concurrency`.
/// Only one identify per key may start every [`IDENTIFY_INTERVAL`]; waiters on
/// the same key are served in arrival order.
#[derive(Debug)]
pub struct IdentifyThrottler {
    max_concurrency: NonZeroU32,
    keys: DashMap<u32, Arc<Mutex<Option<Instant>>>>,
}

impl IdentifyThrottler {
    pub fn new(max_concurrency: NonZeroU32) -> Self {
        Self {
            max_concurrency,
            keys: DashMap::new(),
        }
    }

    pub fn max_concurrency(&self) -> NonZeroU32 {
        self.max_concurrency
    }

    /// Waits until `shard_id` may identify, and claims the slot.
    pub async fn wait_for_identify(&self, shard_id: u32) {
        let key = shard_id % self.max_concurrency;
        let last = Arc::clone(&self.keys.entry(key).or_default());

        let mut last = last.lock().await;
        if let Some(at) = *last {
            sleep_until(at + IDENTIFY_INTERVAL).await;
        }
        *last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use parking_lot::Mutex as SyncMutex;
    use tokio::time::pause;

    /// Whole seconds after the start at which each shard was let through.
    async fn identify_times(max_concurrency: u32, shards: u32) -> Vec<(u32, u64)> {
        let throttler = Arc::new(IdentifyThrottler::new(
            NonZeroU32::new(max_concurrency).unwrap(),
        ));
        let start = Instant::now();
        let times = Arc::new(SyncMutex::new(Vec::new()));

        let handles: Vec<_> = (0..shards)
            .map(|shard_id| {
                let throttler = Arc::clone(&throttler);
                let times = Arc::clone(&times);
                tokio::spawn(async move {
                    throttler.wait_for_identify(shard_id).await;
                    times.lock().push((shard_id, start.elapsed().as_secs()));
                })
            })
            .collect();
        futures::future::join_all(handles).await;

        let mut times = times.lock().clone();
        times.sort();
        times
    }

    #[tokio::test]
    async fn one_key_identifies_every_five_seconds() {
        pause();
        let times = identify_times(1, 3).await;

        assert_eq!(times, vec![(0, 0), (1, 5), (2, 10)]);
    }

    #[tokio::test]
    async fn keys_identify_in_parallel() {
        pause();
        let times = identify_times(2, 4).await;

        assert_eq!(times, vec![(0, 0), (1, 0), (2, 5), (3, 5)]);
    }
}

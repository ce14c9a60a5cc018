use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

use crate::Bucket;
use crate::BucketHash;
use crate::BucketId;
use crate::BucketState;
use crate::RateLimitHeaders;
use crate::RouteData;
use crate::RouteKey;

/// What the table knows about the hash of one route.
#[derive(Debug, Clone)]
pub struct HashEntry {
    pub hash: String,
    pub last_access: Instant,
}

/// A route whose server assigned hash changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashChange {
    pub route: RouteKey,
    pub previous: Option<String>,
    pub current: String,
}

/// The two level bucket lookup.
///
/// `route key -> hash` is learned from responses and `(hash, major parameter)
/// -> bucket` holds the live buckets. Both maps lock per entry, so resolving or
/// updating one bucket never blocks requests for another.
#[derive(Debug, Default)]
pub struct BucketTable {
    hashes: DashMap<RouteKey, HashEntry>,
    buckets: DashMap<BucketId, Arc<Bucket>>,
}

impl BucketTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Finds (or lazily creates) the bucket a request to `route` must queue on.
    pub fn resolve(&self, route: &RouteData) -> Arc<Bucket> {
        let now = Instant::now();
        let hash = match self.hashes.get_mut(&route.key) {
            Some(mut entry) => {
                entry.last_access = now;
                BucketHash::Known(entry.hash.clone())
            }
            None => BucketHash::Unresolved(route.key.clone()),
        };
        let id = BucketId {
            hash,
            major_parameter: route.major_parameter.clone(),
        };

        let bucket = match self.buckets.get(&id) {
            Some(bucket) => Arc::clone(bucket.value()),
            None => self
                .buckets
                .entry(id.clone())
                .or_insert_with(|| Arc::new(Bucket::new(id, BucketState::new(now))))
                .clone(),
        };
        bucket.with_state(|state| state.touch(now));
        bucket
    }

    /// Folds a response for `route`, served from `bucket`, into the table.
    ///
    /// The bucket window is updated in place. If the response names a hash the
    /// table did not map `route` to, the mapping is replaced and the resolved
    /// bucket is seeded with the window just observed, so requests issued from
    /// now on queue there. Requests already queued on `bucket` stay where they are.
    pub fn record(
        &self,
        route: &RouteData,
        bucket: &Bucket,
        headers: &RateLimitHeaders,
    ) -> Option<HashChange> {
        let now = Instant::now();
        let state = bucket.with_state(|state| {
            state.record(now, headers);
            state.clone()
        });

        let hash = headers.bucket.as_ref()?;
        let previous = self
            .hashes
            .insert(
                route.key.clone(),
                HashEntry {
                    hash: hash.clone(),
                    last_access: now,
                },
            )
            .map(|entry| entry.hash);

        if previous.as_ref() == Some(hash) {
            return None;
        }

        let id = BucketId {
            hash: BucketHash::Known(hash.clone()),
            major_parameter: route.major_parameter.clone(),
        };
        if &id != bucket.id() {
            self.buckets
                .entry(id.clone())
                .or_insert_with(|| Arc::new(Bucket::new(id, state)));
        }

        debug!(route = %route.key, ?previous, current = %hash, "bucket hash changed");
        Some(HashChange {
            route: route.key.clone(),
            previous,
            current: hash.clone(),
        })
    }

    /// The hash currently mapped for `key`, if any.
    pub fn hash_for(&self, key: &RouteKey) -> Option<String> {
        self.hashes.get(key).map(|entry| entry.hash.clone())
    }

    pub fn bucket(&self, id: &BucketId) -> Option<Arc<Bucket>> {
        self.buckets.get(id).map(|bucket| Arc::clone(bucket.value()))
    }

    pub fn hash_count(&self) -> usize {
        self.hashes.len()
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Forgets route hashes that have not been used for `lifetime`.
    pub fn sweep_hashes(&self, lifetime: Duration) -> Vec<(RouteKey, HashEntry)> {
        let now = Instant::now();
        let mut swept = Vec::new();
        self.hashes.retain(|key, entry| {
            let keep = now.saturating_duration_since(entry.last_access) < lifetime;
            if !keep {
                swept.push((key.clone(), entry.clone()));
            }
            keep
        });
        swept
    }

    /// Drops buckets that have nothing queued and have been idle for `idle_for`.
    pub fn sweep_buckets(&self, idle_for: Duration) -> Vec<BucketId> {
        let now = Instant::now();
        let mut swept = Vec::new();
        self.buckets.retain(|id, bucket| {
            let keep = !bucket.is_inactive(now, idle_for);
            if !keep {
                swept.push(id.clone());
            }
            keep
        });
        swept
    }
}

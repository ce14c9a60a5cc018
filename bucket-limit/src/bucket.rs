use std::fmt;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::OwnedMutexGuard;
use tokio::time::Instant;

use crate::MAX_WAIT;
use crate::RateLimitHeaders;
use crate::RouteKey;

/// `now + after`, with `after` capped at [`MAX_WAIT`].
fn deadline(now: Instant, after: Duration) -> Instant {
    now.checked_add(after.min(MAX_WAIT)).unwrap_or(now)
}

/// The hash half of a [`BucketId`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BucketHash {
    /// A hash the server told us about.
    Known(String),
    /// No response for this route yet, so the route is its own bucket.
    Unresolved(RouteKey),
}

impl fmt::Display for BucketHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(hash) => f.write_str(hash),
            Self::Unresolved(key) => write!(f, "unresolved({key})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketId {
    pub hash: BucketHash,
    pub major_parameter: String,
}

impl fmt::Display for BucketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.hash, self.major_parameter)
    }
}

/// The limit window of one bucket.
///
/// `remaining` is unsigned and only moves when a response attributable to the
/// bucket comes back (or a 429 closes the window), so it can never go negative.
/// Until the server reports a limit the bucket is treated as unlimited.
#[derive(Debug, Clone)]
pub struct BucketState {
    limit: u32,
    remaining: u32,
    reset_at: Instant,
    last_used: Instant,
}

impl BucketState {
    pub fn new(now: Instant) -> Self {
        Self {
            limit: u32::MAX,
            remaining: u32::MAX,
            reset_at: now,
            last_used: now,
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Requests left in the window as of `now`.
    pub fn remaining(&self, now: Instant) -> u32 {
        if now >= self.reset_at {
            self.limit
        } else {
            self.remaining
        }
    }

    pub fn reset_at(&self) -> Instant {
        self.reset_at
    }

    pub fn last_used(&self) -> Instant {
        self.last_used
    }

    /// True when a request dispatched at `now` would exceed the limit.
    pub fn is_limited(&self, now: Instant) -> bool {
        self.remaining == 0 && now < self.reset_at
    }

    pub fn time_to_reset(&self, now: Instant) -> Duration {
        self.reset_at.saturating_duration_since(now)
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_used = now;
    }

    /// Folds the metadata of a completed response into the window.
    pub fn record(&mut self, now: Instant, headers: &RateLimitHeaders) {
        if now >= self.reset_at {
            self.remaining = self.limit;
        }
        if let Some(limit) = headers.limit {
            self.limit = limit;
        }
        self.remaining = match headers.remaining {
            Some(remaining) => remaining,
            None => self.remaining.saturating_sub(1),
        };
        if let Some(reset_after) = headers.reset_after {
            self.reset_at = deadline(now, reset_after);
        }
        self.last_used = now;
    }

    /// Closes the window for at least `retry_after`.
    pub fn block_for(&mut self, now: Instant, retry_after: Duration) {
        self.remaining = 0;
        self.reset_at = self.reset_at.max(deadline(now, retry_after));
    }
}

/// A rate limit bucket: a FIFO queue with one request in flight at a time,
/// plus the limit window that request is checked against.
#[derive(Debug)]
pub struct Bucket {
    id: BucketId,
    queue: Arc<tokio::sync::Mutex<()>>,
    state: Mutex<BucketState>,
    pending: AtomicUsize,
}

/// Exclusive use of a bucket. Dropping the slot lets the next queued request in.
#[derive(Debug)]
pub struct Slot {
    _turn: OwnedMutexGuard<()>,
    _pending: Pending,
}

#[derive(Debug)]
struct Pending(Arc<Bucket>);

impl Drop for Pending {
    fn drop(&mut self) {
        self.0.pending.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Bucket {
    pub fn new(id: BucketId, state: BucketState) -> Self {
        Self {
            id,
            queue: Arc::new(tokio::sync::Mutex::new(())),
            state: Mutex::new(state),
            pending: AtomicUsize::new(0),
        }
    }

    pub fn id(&self) -> &BucketId {
        &self.id
    }

    /// Waits for this bucket's turn.
    ///
    /// The queue is fair, so slots are handed out in the order `enqueue` was
    /// first polled. A caller that gives up while waiting leaves the queue
    /// without disturbing anyone behind it.
    pub async fn enqueue(self: &Arc<Self>) -> Slot {
        self.pending.fetch_add(1, Ordering::AcqRel);
        let pending = Pending(Arc::clone(self));
        let turn = Arc::clone(&self.queue).lock_owned().await;
        Slot {
            _turn: turn,
            _pending: pending,
        }
    }

    /// Requests queued or in flight.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Runs `f` against the window while holding this bucket's state lock.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut BucketState) -> R) -> R {
        f(&mut *self.state.lock())
    }

    pub fn state(&self) -> BucketState {
        self.state.lock().clone()
    }

    /// True when nothing is queued, the window is open, and the bucket has not
    /// been used for `idle_for`.
    pub fn is_inactive(&self, now: Instant, idle_for: Duration) -> bool {
        if self.pending() > 0 {
            return false;
        }
        let state = self.state.lock();
        !state.is_limited(now) && now.saturating_duration_since(state.last_used) >= idle_for
    }
}

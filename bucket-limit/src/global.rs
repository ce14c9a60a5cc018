use std::num::NonZeroUsize;
use std::ops::ControlFlow;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::time::Instant;

use super::Reason;
use super::Strategy;

/// The process-wide request budget.
///
/// Divides time into fixed one second windows and lets at most `capacity`
/// requests through per window, across every bucket. A global rate limit
/// reported by the server closes the limiter entirely until the block expires.
#[derive(Debug)]
pub struct GlobalLimiter {
    capacity: usize,
    remaining: AtomicUsize,
    expires: AtomicU64,
    blocked_until: AtomicU64,
    interval: u64,
    anchor: Instant,
}

impl Strategy for GlobalLimiter {
    fn process(&self) -> ControlFlow<Reason> {
        let now = self.now();

        let blocked_until = self.blocked_until.load(Ordering::Acquire);
        if now < blocked_until {
            return ControlFlow::Break(Reason::Blocked {
                retry_after: Duration::from_nanos(blocked_until - now),
            });
        }

        if self.capacity == usize::MAX {
            return ControlFlow::Continue(());
        }

        let expires = self.expires.load(Ordering::Acquire);
        if now >= expires {
            let next_expires = now + self.interval;
            if self
                .expires
                .compare_exchange(expires, next_expires, Ordering::SeqCst, Ordering::Relaxed)
                .is_ok()
            {
                self.remaining.store(self.capacity, Ordering::Release);
            }
        }

        let old_remaining =
            self.remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |val| {
                    if val > 0 { Some(val - 1) } else { None }
                });

        match old_remaining {
            Ok(_) => ControlFlow::Continue(()),
            Err(_) => {
                let expires = self.expires.load(Ordering::Acquire);
                ControlFlow::Break(Reason::Overloaded {
                    retry_after: Duration::from_nanos(expires.saturating_sub(now)),
                })
            }
        }
    }

    fn block_for(&self, retry_after: Duration) {
        let nanos = u64::try_from(retry_after.as_nanos()).unwrap_or(u64::MAX);
        let until = self.now().saturating_add(nanos);
        self.blocked_until.fetch_max(until, Ordering::AcqRel);
    }
}

impl GlobalLimiter {
    /// Creates a limiter allowing `per_second` requests in every one second window.
    pub fn new(per_second: NonZeroUsize) -> Self {
        Self::with_interval(per_second, Duration::from_secs(1))
    }

    /// Creates a limiter allowing `capacity` requests per `interval`.
    pub fn with_interval(capacity: NonZeroUsize, interval: Duration) -> Self {
        Self {
            capacity: capacity.get(),
            remaining: capacity.get().into(),
            interval: interval.as_nanos() as u64,
            expires: AtomicU64::new(interval.as_nanos() as u64),
            blocked_until: AtomicU64::new(0),
            anchor: Instant::now(),
        }
    }

    /// A limiter with no per-second budget. Global blocks still apply.
    pub fn unlimited() -> Self {
        Self {
            capacity: usize::MAX,
            remaining: AtomicUsize::new(usize::MAX),
            interval: Duration::from_secs(1).as_nanos() as u64,
            expires: AtomicU64::new(u64::MAX),
            blocked_until: AtomicU64::new(0),
            anchor: Instant::now(),
        }
    }

    /// True while a global block is in force.
    pub fn is_blocked(&self) -> bool {
        self.now() < self.blocked_until.load(Ordering::Acquire)
    }

    fn now(&self) -> u64 {
        Instant::now().duration_since(self.anchor).as_nanos() as u64
    }
}

//! # bucket-limit
//!
//! `bucket-limit` holds the state behind a bucket aware HTTP request scheduler.
//!
//! The remote API groups routes into rate limit "buckets", but it only tells you
//! which bucket a route belongs to once you have made a request to it. This crate
//! models that discovery explicitly:
//!
//! * [`RouteData`] normalises a request path into a [`RouteKey`] plus the one
//!   "major parameter" that splits otherwise identical routes into separate limits.
//! * [`BucketTable`] is a two level lookup: route key to (optional) server hash,
//!   then (hash, major parameter) to [`Bucket`]. Routes with no known hash get a
//!   provisional bucket of their own.
//! * [`GlobalLimiter`] is a lock-free, process-wide requests-per-second budget that
//!   implements the [`Strategy`] trait, so it can be swapped for another limiter.
//! * [`RateLimitHeaders`] normalises response metadata and
//!   [`InvalidRequestCounter`] keeps the advisory 401/403/429 tally.
//!
//! ## Example
//!
//! ```rust
//! use bucket_limit::GlobalLimiter;
//! use bucket_limit::Strategy;
//! use std::num::NonZeroUsize;
//!
//! let limiter = GlobalLimiter::new(NonZeroUsize::new(50).unwrap());
//!
//! if limiter.process().is_continue() {
//!     // Request allowed
//! }
//! ```

use std::fmt::Debug;
use std::ops::ControlFlow;
use std::time::Duration;

mod bucket;
mod global;
mod headers;
mod invalid;
mod route;
mod table;

pub use bucket::Bucket;
pub use bucket::BucketHash;
pub use bucket::BucketId;
pub use bucket::BucketState;
pub use bucket::Slot;
pub use global::GlobalLimiter;
pub use headers::MAX_WAIT;
pub use headers::RateLimitHeaders;
pub use headers::RateLimitScope;
pub use invalid::InvalidRequestCounter;
pub use invalid::InvalidRequestWarning;
pub use route::RouteData;
pub use route::RouteKey;
pub use table::BucketTable;
pub use table::HashChange;
pub use table::HashEntry;

/// Reasons why a request might be held back by a strategy.
#[derive(Debug, PartialEq)]
pub enum Reason {
    /// The budget for the current window is spent.
    Overloaded { retry_after: Duration },
    /// The server told us to stop sending anything for a while.
    Blocked { retry_after: Duration },
}

impl Reason {
    pub fn retry_after(&self) -> Duration {
        match self {
            Reason::Overloaded { retry_after } | Reason::Blocked { retry_after } => *retry_after,
        }
    }
}

/// The core trait for the process-wide request budget.
///
/// Strategies are shared across tasks, hence the `Send` and `Sync` bounds.
pub trait Strategy: Debug + Send + Sync {
    /// Attempts to take one request from the budget.
    ///
    /// This method is non-blocking and uses atomic operations to update
    /// internal state.
    ///
    /// # Errors
    ///
    /// Returns `Reason` if the request has to wait.
    fn process(&self) -> ControlFlow<Reason>;

    /// Stops every caller for `retry_after`, as requested by a global rate limit.
    fn block_for(&self, _retry_after: Duration) {}
}

use std::time::Duration;

use bucket_limit::InvalidRequestWarning;
use bucket_limit::RateLimitScope;
use http::Method;
use http::StatusCode;

/// A request about to wait for, or be rejected by, a rate limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitData {
    pub time_to_reset: Duration,
    /// The bucket limit, if known.
    pub limit: Option<u32>,
    pub method: Method,
    /// The bucket hash, or the route key while the hash is unknown.
    pub hash: String,
    pub url: String,
    pub route: String,
    pub major_parameter: String,
    pub global: bool,
    pub scope: Option<RateLimitScope>,
}

/// A completed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseData {
    pub method: Method,
    pub path: String,
    pub route: String,
    pub status: StatusCode,
    /// 1 for the first attempt.
    pub attempt: u32,
    pub elapsed: Duration,
}

/// Observability events published by [`Rest`](crate::Rest).
///
/// Events are advisory. With no subscriber they are dropped and the
/// scheduler behaves exactly the same.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestEvent {
    RateLimited(RateLimitData),
    InvalidRequestWarning(InvalidRequestWarning),
    /// Route hashes removed by a sweep, as `METHOD:route -> hash`.
    HashSweep(Vec<(String, String)>),
    /// Idle buckets removed by a sweep.
    HandlerSweep(Vec<String>),
    Response(ResponseData),
    Debug(String),
}

//! # Tower Bucket
//!
//! `tower-bucket` is a rate limited HTTP request scheduler built on the
//! [Tower](https://github.com/tower-rs/tower) ecosystem.
//!
//! The HTTP client itself is injected: any
//! `Service<http::Request<Bytes>, Response = http::Response<Bytes>, Error = BoxError>`
//! will do. [`Rest`] puts every request through the same pipeline:
//!
//! 1. **Bucket resolution**: the request path is reduced to a route key and mapped to
//!    a [`bucket_limit::Bucket`]. Routes with an unknown server hash get a bucket of
//!    their own until the first response names one.
//! 2. **Queueing**: each bucket serves its queue in FIFO order, one request at a time.
//! 3. **Limits**: the request waits for its bucket window to reopen, then for a token
//!    from the process-wide [`bucket_limit::GlobalLimiter`].
//! 4. **Dispatch**: the transport call runs under a timeout. 429s wait and try again
//!    without spending a retry; 5xx, timeouts and transport errors are retried with
//!    backoff; other 4xx fail straight away.
//!
//! Events are published on a broadcast channel ([`Rest::subscribe`]) and counters on
//! the global OpenTelemetry meter `tower_bucket`.

mod error;
mod events;
mod metrics;
mod options;
mod request;
mod response;
mod rest;
mod service;


pub use error::NetworkFailure;
pub use error::RestError;
pub use events::RateLimitData;
pub use events::ResponseData;
pub use events::RestEvent;
pub use options::RejectOnRateLimit;
pub use options::RestOptions;
pub use request::ApiRequest;
pub use request::RequestBody;
pub use request::RequestData;
pub use request::RequestTimeout;
pub use response::ApiResponse;
pub use response::ResponseBody;
pub use rest::Rest;

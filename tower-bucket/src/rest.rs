use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::Weak;
use std::time::Duration;

use bucket_limit::Bucket;
use bucket_limit::BucketTable;
use bucket_limit::GlobalLimiter;
use bucket_limit::InvalidRequestCounter;
use bucket_limit::RateLimitHeaders;
use bucket_limit::RouteData;
use bucket_limit::Strategy;
use bytes::Bytes;
use http::HeaderValue;
use http::Method;
use parking_lot::Mutex;
use parking_lot::RwLock;
use rand::Rng;
use serde::Deserialize;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio::time::interval_at;
use tokio::time::sleep;
use tokio::time::timeout;
use tower::BoxError;
use tower::Service;
use tower::ServiceExt;
use tracing::debug;
use tracing::warn;

use crate::ApiRequest;
use crate::ApiResponse;
use crate::NetworkFailure;
use crate::RequestData;
use crate::ResponseBody;
use crate::RestError;
use crate::RestOptions;
use crate::events::RateLimitData;
use crate::events::ResponseData;
use crate::events::RestEvent;
use crate::metrics::RestMetrics;

const EVENT_CAPACITY: usize = 256;
const BACKOFF_BASE: Duration = Duration::from_millis(100);
const BACKOFF_MAX: Duration = Duration::from_secs(5);
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

/// The body of a 429.
#[derive(Debug, Default, Deserialize)]
struct RateLimitBody {
    #[serde(default)]
    retry_after: Option<f64>,
    #[serde(default)]
    global: bool,
}

/// A rate limited request scheduler.
///
/// Every request is routed to a bucket and queued there behind the requests
/// issued before it. Only the head of each queue talks to the transport, and
/// only once both its bucket window and the global limiter allow it.
/// Requests on different buckets run in parallel.
///
/// `Rest` is cheap to clone; clones share all state.
pub struct Rest<T> {
    inner: Arc<RestInner<T>>,
}

impl<T> Clone for Rest<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Rest<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rest")
            .field("options", &self.inner.options)
            .field("global", &self.inner.global)
            .field("buckets", &self.inner.table.bucket_count())
            .finish_non_exhaustive()
    }
}

struct RestInner<T> {
    transport: T,
    options: RestOptions,
    user_agent: HeaderValue,
    token: RwLock<Option<String>>,
    table: BucketTable,
    global: Arc<dyn Strategy + Send + Sync>,
    invalid: InvalidRequestCounter,
    events: broadcast::Sender<RestEvent>,
    metrics: RestMetrics,
    sweepers: Mutex<Vec<JoinHandle<()>>>,
}

impl<T> Drop for RestInner<T> {
    fn drop(&mut self) {
        for sweeper in self.sweepers.get_mut().drain(..) {
            sweeper.abort();
        }
    }
}

/// What became of one attempt.
enum Attempt {
    Done(ApiResponse),
    RateLimited,
    Failed(NetworkFailure),
}

impl<T> Rest<T>
where
    T: Service<http::Request<Bytes>, Response = http::Response<Bytes>, Error = BoxError>
        + Clone
        + Send
        + Sync
        + 'static,
    T::Future: Send,
{
    /// Creates a scheduler sending requests through `transport`.
    ///
    /// The background sweepers are started on the current tokio runtime. Outside
    /// a runtime they are skipped and sweeping is left to
    /// [`sweep_hashes`](Self::sweep_hashes) and [`sweep_handlers`](Self::sweep_handlers).
    pub fn new(transport: T, options: RestOptions) -> Self {
        let global: Arc<dyn Strategy + Send + Sync> = match (
            &options.global_strategy,
            options.global_requests_per_second,
        ) {
            (Some(strategy), _) => Arc::clone(strategy),
            (None, Some(limit)) => Arc::new(GlobalLimiter::new(limit)),
            (None, None) => Arc::new(GlobalLimiter::unlimited()),
        };
        let user_agent = HeaderValue::from_str(&options.user_agent())
            .unwrap_or_else(|_| HeaderValue::from_static("DiscordBot"));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let inner = Arc::new(RestInner {
            transport,
            user_agent,
            token: RwLock::new(None),
            table: BucketTable::new(),
            global,
            invalid: InvalidRequestCounter::new(options.invalid_request_warning_interval),
            events,
            metrics: RestMetrics::new(),
            sweepers: Mutex::new(Vec::new()),
            options,
        });

        let sweepers = [
            spawn_sweeper(
                &inner,
                inner.options.hash_sweep_interval,
                RestInner::sweep_hashes,
            ),
            spawn_sweeper(
                &inner,
                inner.options.handler_sweep_interval,
                RestInner::sweep_handlers,
            ),
        ];
        inner.sweepers.lock().extend(sweepers.into_iter().flatten());

        Self { inner }
    }

    /// Sets the token sent with every request that needs authorization.
    pub fn set_token(&self, token: impl Into<String>) {
        *self.inner.token.write() = Some(token.into());
    }

    /// Runs `request` through its bucket and returns the raw response.
    pub async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, RestError> {
        let Some(deadline) = request.data.deadline else {
            return self.inner.execute(request).await;
        };

        let method = request.method.clone();
        let path = request.path.clone();
        timeout(deadline, self.inner.execute(request))
            .await
            .map_err(|_| RestError::DeadlineExceeded { method, path })?
    }

    /// Same as [`execute`](Self::execute).
    pub async fn raw(&self, request: ApiRequest) -> Result<ApiResponse, RestError> {
        self.execute(request).await
    }

    /// Executes `request` and parses the body.
    pub async fn request(&self, request: ApiRequest) -> Result<ResponseBody, RestError> {
        self.execute(request).await?.parse()
    }

    pub async fn get(&self, path: &str, data: RequestData) -> Result<ResponseBody, RestError> {
        self.verb(Method::GET, path, data).await
    }

    pub async fn post(&self, path: &str, data: RequestData) -> Result<ResponseBody, RestError> {
        self.verb(Method::POST, path, data).await
    }

    pub async fn put(&self, path: &str, data: RequestData) -> Result<ResponseBody, RestError> {
        self.verb(Method::PUT, path, data).await
    }

    pub async fn patch(&self, path: &str, data: RequestData) -> Result<ResponseBody, RestError> {
        self.verb(Method::PATCH, path, data).await
    }

    pub async fn delete(&self, path: &str, data: RequestData) -> Result<ResponseBody, RestError> {
        self.verb(Method::DELETE, path, data).await
    }

    async fn verb(
        &self,
        method: Method,
        path: &str,
        data: RequestData,
    ) -> Result<ResponseBody, RestError> {
        self.request(ApiRequest::new(method, path).with_data(data))
            .await
    }
}

impl<T> Rest<T> {
    /// Subscribes to scheduler events. Events published before subscribing are not seen.
    pub fn subscribe(&self) -> broadcast::Receiver<RestEvent> {
        self.inner.events.subscribe()
    }

    /// Runs one hash sweep now, returning how many route hashes were dropped.
    pub fn sweep_hashes(&self) -> usize {
        self.inner.sweep_hashes()
    }

    /// Runs one idle bucket sweep now, returning how many buckets were dropped.
    pub fn sweep_handlers(&self) -> usize {
        self.inner.sweep_handlers()
    }

    pub fn buckets(&self) -> &BucketTable {
        &self.inner.table
    }

    pub fn options(&self) -> &RestOptions {
        &self.inner.options
    }

    /// Invalid requests counted in the current ten minute window.
    pub fn invalid_request_count(&self) -> u64 {
        self.inner.invalid.count()
    }
}

impl<T> RestInner<T> {
    fn emit(&self, event: RestEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn sweep_hashes(&self) -> usize {
        let swept = self.table.sweep_hashes(self.options.hash_lifetime);
        let count = swept.len();
        debug!(count, "swept route hashes");
        self.emit(RestEvent::HashSweep(
            swept
                .into_iter()
                .map(|(key, entry)| (key.to_string(), entry.hash))
                .collect(),
        ));
        count
    }

    fn sweep_handlers(&self) -> usize {
        let swept = self
            .table
            .sweep_buckets(self.options.handler_sweep_interval);
        let count = swept.len();
        debug!(count, "swept idle buckets");
        self.emit(RestEvent::HandlerSweep(
            swept.iter().map(ToString::to_string).collect(),
        ));
        count
    }

    fn rate_limit_data(
        &self,
        request: &ApiRequest,
        route: &RouteData,
        bucket: &Bucket,
        time_to_reset: Duration,
        headers: Option<&RateLimitHeaders>,
    ) -> RateLimitData {
        let limit = bucket.state().limit();
        RateLimitData {
            time_to_reset,
            limit: (limit != u32::MAX).then_some(limit),
            method: request.method.clone(),
            hash: bucket.id().hash.to_string(),
            url: request.url(&self.options),
            route: route.route().to_string(),
            major_parameter: route.major_parameter.clone(),
            global: headers.is_some_and(|h| h.global),
            scope: headers.and_then(|h| h.scope),
        }
    }

    /// Records a rate limit hit, failing if the caller opted out of waiting for it.
    fn on_rate_limit(&self, data: RateLimitData) -> Result<(), RestError> {
        self.metrics.rate_limited(&data.route, data.global);
        self.emit(RestEvent::RateLimited(data.clone()));

        if self.options.reject_on_rate_limit.should_reject(&data) {
            return Err(RestError::rate_limited(
                &data.method,
                &data.route,
                &data.major_parameter,
                data.scope,
                data.global,
                data.time_to_reset,
                data.limit,
            ));
        }
        Ok(())
    }

    /// Waits until the bucket window allows another request.
    async fn wait_for_bucket(
        &self,
        request: &ApiRequest,
        route: &RouteData,
        bucket: &Bucket,
    ) -> Result<(), RestError> {
        loop {
            let now = Instant::now();
            let Some(time_to_reset) = bucket.with_state(|state| {
                state
                    .is_limited(now)
                    .then(|| state.time_to_reset(now))
            }) else {
                return Ok(());
            };

            self.on_rate_limit(self.rate_limit_data(request, route, bucket, time_to_reset, None))?;
            debug!(
                bucket = %bucket.id(),
                ?time_to_reset,
                "waiting for bucket to reset"
            );
            sleep(time_to_reset + self.options.offset).await;
        }
    }

    /// Waits for one token from the global limiter.
    async fn wait_for_global(&self) {
        while let ControlFlow::Break(reason) = self.global.process() {
            debug!(?reason, "waiting for global limiter");
            sleep(reason.retry_after().max(Duration::from_millis(1))).await;
        }
    }
}

impl<T> RestInner<T>
where
    T: Service<http::Request<Bytes>, Response = http::Response<Bytes>, Error = BoxError>
        + Clone
        + Send
        + Sync
        + 'static,
    T::Future: Send,
{
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, RestError> {
        let route = RouteData::new(&request.method, &request.path);
        let bucket = self.table.resolve(&route);

        // Held across retries so the bucket keeps its order
        let _slot = bucket.enqueue().await;

        let mut attempt = 0;
        let mut retries = 0;
        loop {
            self.wait_for_bucket(&request, &route, &bucket).await?;
            self.wait_for_global().await;

            attempt += 1;
            let failure = match self.attempt(&request, &route, &bucket, attempt).await? {
                Attempt::Done(response) => return Ok(response),
                Attempt::RateLimited => continue,
                Attempt::Failed(failure) => failure,
            };

            if retries >= self.options.retries {
                warn!(
                    method = %request.method,
                    path = %request.path,
                    attempts = attempt,
                    %failure,
                    "giving up"
                );
                return Err(RestError::Network {
                    method: request.method.clone(),
                    path: request.path.clone(),
                    attempts: attempt,
                    failure,
                });
            }

            retries += 1;
            self.metrics.retry(route.route());
            let wait = backoff(retries);
            warn!(
                method = %request.method,
                path = %request.path,
                retry = retries,
                ?wait,
                %failure,
                "retrying request"
            );
            sleep(wait).await;
        }
    }

    async fn attempt(
        &self,
        request: &ApiRequest,
        route: &RouteData,
        bucket: &Bucket,
        attempt: u32,
    ) -> Result<Attempt, RestError> {
        let http = request.to_http(
            &self.options,
            self.token.read().as_deref(),
            &self.user_agent,
        )?;

        debug!(method = %request.method, path = %request.path, attempt, "sending request");
        let started = Instant::now();
        let response = match timeout(
            self.options.timeout,
            self.transport.clone().oneshot(http),
        )
        .await
        {
            Ok(Ok(response)) => response,
            Ok(Err(error)) => {
                return Ok(Attempt::Failed(NetworkFailure::Transport(error.to_string())));
            }
            Err(_) => return Ok(Attempt::Failed(NetworkFailure::Timeout)),
        };

        let status = response.status();
        let headers = RateLimitHeaders::from_headers(response.headers());
        self.metrics.request(route.route(), status.as_u16());
        self.emit(RestEvent::Response(ResponseData {
            method: request.method.clone(),
            path: request.path.clone(),
            route: route.route().to_string(),
            status,
            attempt,
            elapsed: started.elapsed(),
        }));

        if let Some(change) = self.table.record(route, bucket, &headers) {
            self.emit(RestEvent::Debug(format!(
                "bucket hash for {} changed from {:?} to {}",
                change.route, change.previous, change.current
            )));
        }

        if InvalidRequestCounter::is_invalid(status) {
            self.metrics.invalid_request(status.as_u16());
            if let Some(warning) = self.invalid.record(status) {
                warn!(
                    count = warning.count,
                    remaining = ?warning.remaining_time,
                    "invalid request limit approaching"
                );
                self.emit(RestEvent::InvalidRequestWarning(warning));
            }
        }

        if status.is_success() || status.is_redirection() || status.is_informational() {
            return Ok(Attempt::Done(ApiResponse::from_http(response)));
        }

        if status == http::StatusCode::TOO_MANY_REQUESTS {
            let body: RateLimitBody = serde_json::from_slice(response.body()).unwrap_or_default();
            let retry_after = headers
                .retry_after
                .or_else(|| body.retry_after.and_then(RateLimitHeaders::wait_from_secs))
                .or(headers.reset_after)
                .unwrap_or(DEFAULT_RETRY_AFTER);
            let headers = RateLimitHeaders {
                global: headers.global || body.global,
                ..headers
            };

            if headers.global {
                self.global.block_for(retry_after);
            }
            bucket.with_state(|state| state.block_for(Instant::now(), retry_after));

            warn!(
                method = %request.method,
                route = %route.key,
                global = headers.global,
                ?retry_after,
                "rate limited"
            );
            self.on_rate_limit(self.rate_limit_data(
                request,
                route,
                bucket,
                retry_after,
                Some(&headers),
            ))?;
            sleep(retry_after).await;
            return Ok(Attempt::RateLimited);
        }

        if status.is_server_error() {
            return Ok(Attempt::Failed(NetworkFailure::Server { status }));
        }

        Err(RestError::Http {
            method: request.method.clone(),
            path: request.path.clone(),
            status,
            body: response.into_body(),
        })
    }
}

/// The wait before retry number `retry` (1 based): exponential, capped, plus
/// up to 25% jitter.
fn backoff(retry: u32) -> Duration {
    let base = BACKOFF_BASE
        .saturating_mul(1 << retry.saturating_sub(1).min(16))
        .min(BACKOFF_MAX);
    let jitter = rand::rng().random_range(0..=base.as_millis() as u64 / 4);
    base + Duration::from_millis(jitter)
}

fn spawn_sweeper<T>(
    inner: &Arc<RestInner<T>>,
    every: Duration,
    sweep: fn(&RestInner<T>) -> usize,
) -> Option<JoinHandle<()>>
where
    T: Send + Sync + 'static,
{
    if every.is_zero() {
        return None;
    }
    let Ok(handle) = Handle::try_current() else {
        warn!("no tokio runtime, background sweeping is disabled");
        return None;
    };

    let weak: Weak<RestInner<T>> = Arc::downgrade(inner);
    Some(handle.spawn(async move {
        let mut ticker = interval_at(Instant::now() + every, every);
        loop {
            ticker.tick().await;
            let Some(inner) = weak.upgrade() else {
                break;
            };
            sweep(&inner);
        }
    }))
}

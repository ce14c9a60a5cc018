use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tower::BoxError;
use tower::Service;
use tower_bucket::ApiRequest;
use tower_bucket::Rest;
use tracing::debug;

use crate::FleetError;

/// The session start budget shared by every shard of the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStartLimit {
    pub total: u32,
    pub remaining: u32,
    /// Milliseconds until `remaining` goes back to `total`.
    pub reset_after: u64,
    /// Shards that may identify at the same time.
    pub max_concurrency: u32,
}

/// The body of `GET /gateway/bot`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayInfo {
    pub url: String,
    /// The recommended shard count.
    pub shards: u32,
    pub session_start_limit: SessionStartLimit,
}

/// Somewhere gateway information can be fetched from.
#[async_trait]
pub trait GatewayInfoSource: Send + Sync {
    async fn fetch_gateway_info(&self) -> Result<GatewayInfo, FleetError>;
}

#[async_trait]
impl<T> GatewayInfoSource for Rest<T>
where
    T: Service<http::Request<Bytes>, Response = http::Response<Bytes>, Error = BoxError>
        + Clone
        + Send
        + Sync
        + 'static,
    T::Future: Send,
{
    async fn fetch_gateway_info(&self) -> Result<GatewayInfo, FleetError> {
        let response = self.execute(ApiRequest::get("/gateway/bot")).await?;
        Ok(response.json()?)
    }
}

#[derive(Debug)]
struct Cached {
    info: Arc<GatewayInfo>,
    expires_at: Instant,
}

/// A single slot cache of [`GatewayInfo`].
///
/// An entry lives for `session_start_limit.reset_after`, since that is when the
/// session budget it reports goes stale. Callers that queue behind an in flight
/// fetch share its result instead of fetching again, forced or not.
pub struct GatewayInfoCache {
    source: Arc<dyn GatewayInfoSource>,
    slot: Mutex<Option<Cached>>,
    generation: AtomicU64,
}

impl GatewayInfoCache {
    pub fn new(source: Arc<dyn GatewayInfoSource>) -> Self {
        Self {
            source,
            slot: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// Returns the cached snapshot, fetching a new one if there is none, it has
    /// expired, or `force` is set.
    pub async fn get(&self, force: bool) -> Result<Arc<GatewayInfo>, FleetError> {
        let seen = self.generation.load(Ordering::Acquire);
        let mut slot = self.slot.lock().await;

        if let Some(cached) = slot.as_ref() {
            let refreshed = self.generation.load(Ordering::Acquire) != seen;
            let fresh = cached.expires_at > Instant::now();
            if refreshed || (fresh && !force) {
                return Ok(Arc::clone(&cached.info));
            }
        }

        let info = Arc::new(self.source.fetch_gateway_info().await?);
        let ttl = Duration::from_millis(info.session_start_limit.reset_after);
        debug!(
            shards = info.shards,
            remaining = info.session_start_limit.remaining,
            ?ttl,
            "fetched gateway information"
        );
        *slot = Some(Cached {
            info: Arc::clone(&info),
            expires_at: Instant::now() + ttl,
        });
        self.generation.fetch_add(1, Ordering::AcqRel);
        Ok(info)
    }

    /// When the cached snapshot expires, if there is one.
    pub async fn expires_at(&self) -> Option<Instant> {
        self.slot.lock().await.as_ref().map(|cached| cached.expires_at)
    }
}

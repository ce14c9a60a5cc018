use std::collections::BTreeMap;
use std::fmt;
use std::num::NonZeroU32;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use tower::BoxError;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::DestroyOptions;
use crate::FleetError;
use crate::GatewayPayload;
use crate::IdentifyThrottler;
use crate::SessionInfo;
use crate::SessionStore;
use crate::ShardingStrategy;
use crate::SpawnPlan;

/// One gateway connection.
#[async_trait]
pub trait Shard: Send + Sync {
    /// Opens the connection and identifies (or resumes).
    async fn connect(&self) -> Result<(), BoxError>;

    async fn destroy(&self, options: DestroyOptions) -> Result<(), BoxError>;

    async fn send(&self, payload: GatewayPayload) -> Result<(), BoxError>;
}

/// Builds shards for [`SimpleShardingStrategy`].
pub trait ShardFactory: Send + Sync {
    fn create(&self, context: ShardContext) -> Result<Arc<dyn Shard>, BoxError>;
}

/// What a shard is told about itself when it is created.
#[derive(Clone)]
pub struct ShardContext {
    pub shard_id: u32,
    pub shard_count: u32,
    pub gateway_url: String,
    session_store: Arc<dyn SessionStore>,
}

impl fmt::Debug for ShardContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardContext")
            .field("shard_id", &self.shard_id)
            .field("shard_count", &self.shard_count)
            .field("gateway_url", &self.gateway_url)
            .finish_non_exhaustive()
    }
}

impl ShardContext {
    /// The stored session of this shard, if it has one to resume.
    pub async fn retrieve_session(&self) -> Result<Option<SessionInfo>, FleetError> {
        self.session_store
            .retrieve(self.shard_id)
            .await
            .map_err(FleetError::Session)
    }

    pub async fn update_session(&self, info: Option<SessionInfo>) -> Result<(), FleetError> {
        self.session_store
            .update(self.shard_id, info)
            .await
            .map_err(FleetError::Session)
    }
}

/// Runs every shard in this process.
pub struct SimpleShardingStrategy {
    factory: Arc<dyn ShardFactory>,
    session_store: Arc<dyn SessionStore>,
    shards: Mutex<BTreeMap<u32, Arc<dyn Shard>>>,
    throttler: Mutex<Arc<IdentifyThrottler>>,
}

impl SimpleShardingStrategy {
    pub fn new(factory: Arc<dyn ShardFactory>, session_store: Arc<dyn SessionStore>) -> Self {
        Self {
            factory,
            session_store,
            shards: Mutex::new(BTreeMap::new()),
            throttler: Mutex::new(Arc::new(IdentifyThrottler::new(NonZeroU32::MIN))),
        }
    }

    /// Ids of the shards currently spawned.
    pub fn shard_ids(&self) -> Vec<u32> {
        self.shards.lock().keys().copied().collect()
    }

    fn shard(&self, shard_id: u32) -> Result<Arc<dyn Shard>, FleetError> {
        self.shards
            .lock()
            .get(&shard_id)
            .cloned()
            .ok_or(FleetError::UnknownShard(shard_id))
    }
}

/// The first error of a batch of shard operations, after logging the rest.
fn first_error(results: Vec<Result<(), FleetError>>) -> Result<(), FleetError> {
    let mut errors = results.into_iter().filter_map(Result::err);
    let first = errors.next();
    for error in errors {
        warn!(%error, "shard operation failed");
    }
    first.map_or(Ok(()), Err)
}

#[async_trait]
impl ShardingStrategy for SimpleShardingStrategy {
    async fn spawn(&self, plan: SpawnPlan) -> Result<(), FleetError> {
        let mut spawned = BTreeMap::new();
        for &shard_id in &plan.shard_ids {
            let context = ShardContext {
                shard_id,
                shard_count: plan.shard_count,
                gateway_url: plan.gateway_url.clone(),
                session_store: Arc::clone(&self.session_store),
            };
            let shard = self
                .factory
                .create(context)
                .map_err(|source| FleetError::Shard { shard_id, source })?;
            spawned.insert(shard_id, shard);
        }

        debug!(
            shards = spawned.len(),
            max_concurrency = plan.max_concurrency,
            "spawned shards"
        );
        *self.throttler.lock() = Arc::new(IdentifyThrottler::new(
            NonZeroU32::new(plan.max_concurrency).unwrap_or(NonZeroU32::MIN),
        ));
        self.shards.lock().extend(spawned);
        Ok(())
    }

    async fn connect(&self) -> Result<(), FleetError> {
        let shards: Vec<(u32, Arc<dyn Shard>)> = self
            .shards
            .lock()
            .iter()
            .map(|(id, shard)| (*id, Arc::clone(shard)))
            .collect();
        let throttler = Arc::clone(&self.throttler.lock());

        let results = join_all(shards.into_iter().map(|(shard_id, shard)| {
            let throttler = Arc::clone(&throttler);
            async move {
                throttler.wait_for_identify(shard_id).await;
                info!(shard_id, "connecting shard");
                shard
                    .connect()
                    .await
                    .map_err(|source| FleetError::Shard { shard_id, source })
            }
        }))
        .await;
        first_error(results)
    }

    async fn destroy(&self, options: DestroyOptions) -> Result<(), FleetError> {
        let shards = std::mem::take(&mut *self.shards.lock());

        let results = join_all(shards.into_iter().map(|(shard_id, shard)| {
            let options = options.clone();
            async move {
                shard
                    .destroy(options)
                    .await
                    .map_err(|source| FleetError::Shard { shard_id, source })
            }
        }))
        .await;
        first_error(results)
    }

    async fn send(&self, shard_id: u32, payload: GatewayPayload) -> Result<(), FleetError> {
        self.shard(shard_id)?
            .send(payload)
            .await
            .map_err(|source| FleetError::Shard { shard_id, source })
    }
}

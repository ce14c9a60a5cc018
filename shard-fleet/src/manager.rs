use std::fmt;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use chrono::Utc;
use parking_lot::Mutex;
use parking_lot::RwLock;
use tracing::debug;
use tracing::info;

use crate::DestroyOptions;
use crate::FleetError;
use crate::GatewayInfo;
use crate::GatewayInfoCache;
use crate::GatewayInfoSource;
use crate::GatewayPayload;
use crate::MemorySessionStore;
use crate::SessionStore;
use crate::ShardFactory;
use crate::ShardIds;
use crate::ShardingStrategy;
use crate::SimpleShardingStrategy;
use crate::SpawnPlan;

const ADJUSTING_SHARDS: &str = "User is adjusting their shards";

/// Configuration for [`ShardFleet`].
#[derive(Clone)]
pub struct FleetOptions {
    shard_count: Option<NonZeroU32>,
    shard_ids: Option<ShardIds>,
    session_store: Arc<dyn SessionStore>,
}

impl Default for FleetOptions {
    fn default() -> Self {
        Self {
            shard_count: None,
            shard_ids: None,
            session_store: Arc::new(MemorySessionStore::new()),
        }
    }
}

impl fmt::Debug for FleetOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FleetOptions")
            .field("shard_count", &self.shard_count)
            .field("shard_ids", &self.shard_ids)
            .finish_non_exhaustive()
    }
}

impl FleetOptions {
    /// Total shards across every fleet of the application. Without it the
    /// gateway recommendation is used.
    pub fn with_shard_count(mut self, shard_count: NonZeroU32) -> Self {
        self.shard_count = Some(shard_count);
        self
    }

    /// The shards this fleet runs. Without it the fleet runs `0..shard_count`.
    pub fn with_shard_ids(mut self, shard_ids: ShardIds) -> Self {
        self.shard_ids = Some(shard_ids);
        self
    }

    pub fn with_session_store(mut self, session_store: Arc<dyn SessionStore>) -> Self {
        self.session_store = session_store;
        self
    }
}

/// Orchestrates a set of shards.
///
/// The fleet works out which shards to run and how many there are in total,
/// checks the session budget before connecting, and tells the
/// [`ShardingStrategy`] when to spawn, connect, destroy and send. It never
/// touches a connection itself.
pub struct ShardFleet {
    gateway: GatewayInfoCache,
    shard_count: Mutex<Option<NonZeroU32>>,
    configured_ids: Option<ShardIds>,
    shard_ids: tokio::sync::Mutex<Option<Vec<u32>>>,
    strategy: RwLock<Arc<dyn ShardingStrategy>>,
    session_store: Arc<dyn SessionStore>,
    topology: tokio::sync::Mutex<()>,
}

impl fmt::Debug for ShardFleet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardFleet")
            .field("shard_count", &*self.shard_count.lock())
            .field("configured_ids", &self.configured_ids)
            .finish_non_exhaustive()
    }
}

impl ShardFleet {
    /// A fleet running every shard in process, built by `factory`.
    pub fn new(
        source: Arc<dyn GatewayInfoSource>,
        options: FleetOptions,
        factory: Arc<dyn ShardFactory>,
    ) -> Self {
        let strategy = Arc::new(SimpleShardingStrategy::new(
            factory,
            Arc::clone(&options.session_store),
        ));
        Self::with_strategy(source, options, strategy)
    }

    pub fn with_strategy(
        source: Arc<dyn GatewayInfoSource>,
        options: FleetOptions,
        strategy: Arc<dyn ShardingStrategy>,
    ) -> Self {
        Self {
            gateway: GatewayInfoCache::new(source),
            shard_count: Mutex::new(options.shard_count),
            configured_ids: options.shard_ids,
            shard_ids: tokio::sync::Mutex::new(None),
            strategy: RwLock::new(strategy),
            session_store: options.session_store,
            topology: tokio::sync::Mutex::new(()),
        }
    }

    /// Replaces the strategy. Shards spawned by the old one are left alone.
    pub fn set_strategy(&self, strategy: Arc<dyn ShardingStrategy>) -> &Self {
        *self.strategy.write() = strategy;
        self
    }

    pub fn session_store(&self) -> &Arc<dyn SessionStore> {
        &self.session_store
    }

    fn strategy(&self) -> Arc<dyn ShardingStrategy> {
        Arc::clone(&self.strategy.read())
    }

    /// Gateway information, from cache unless it is missing, expired or `force` is set.
    pub async fn fetch_gateway_information(
        &self,
        force: bool,
    ) -> Result<Arc<GatewayInfo>, FleetError> {
        self.gateway.get(force).await
    }

    /// Total shards across every fleet of the application.
    ///
    /// An explicit count wins over everything, including an explicit id list.
    /// Otherwise it is one more than the highest managed shard id.
    pub async fn shard_count(&self) -> Result<u32, FleetError> {
        let explicit = *self.shard_count.lock();
        if let Some(count) = explicit {
            return Ok(count.get());
        }

        let ids = self.shard_ids(false).await?;
        let max = ids
            .last()
            .ok_or_else(|| FleetError::Configuration("no shards to manage".to_string()))?;
        max.checked_add(1).ok_or_else(|| {
            FleetError::Configuration(format!("shard id {max} leaves no room for a shard count"))
        })
    }

    /// The shards this fleet runs, in ascending order.
    ///
    /// Resolved from the configured ids, else the shard count, else the gateway
    /// recommendation, then cached until `force` is set.
    pub async fn shard_ids(&self, force: bool) -> Result<Vec<u32>, FleetError> {
        let mut cached = self.shard_ids.lock().await;
        if !force && let Some(ids) = cached.as_ref() {
            return Ok(ids.clone());
        }

        let ids = match &self.configured_ids {
            Some(configured) => configured.resolve()?,
            None => {
                let count = *self.shard_count.lock();
                let count = match count {
                    Some(count) => count.get(),
                    None => self.fetch_gateway_information(false).await?.shards,
                };
                if count == 0 {
                    return Err(FleetError::Configuration(
                        "the gateway recommended zero shards".to_string(),
                    ));
                }
                (0..count).collect()
            }
        };

        debug!(?ids, "resolved shard ids");
        *cached = Some(ids.clone());
        Ok(ids)
    }

    /// Replaces the running shards: resolves the set for `shard_count` (`None`
    /// falls back to the gateway recommendation), then destroys every running
    /// shard and spawns the new set.
    ///
    /// Nothing is destroyed when the new set cannot be resolved, and the
    /// previous shard count stays in force.
    pub async fn update_shard_count(
        &self,
        shard_count: Option<NonZeroU32>,
    ) -> Result<(), FleetError> {
        let _topology = self.topology.lock().await;
        let strategy = self.strategy();

        info!(?shard_count, "adjusting shards");
        let previous = std::mem::replace(&mut *self.shard_count.lock(), shard_count);
        let plan = match self.plan().await {
            Ok(plan) => plan,
            Err(error) => {
                *self.shard_count.lock() = previous;
                *self.shard_ids.lock().await = None;
                return Err(error);
            }
        };

        strategy
            .destroy(DestroyOptions::with_reason(ADJUSTING_SHARDS))
            .await?;
        strategy.spawn(plan).await
    }

    async fn plan(&self) -> Result<SpawnPlan, FleetError> {
        let info = self.fetch_gateway_information(false).await?;
        let shard_ids = self.shard_ids(true).await?;
        Ok(SpawnPlan {
            shard_count: self.shard_count().await?,
            shard_ids,
            gateway_url: info.url.clone(),
            max_concurrency: info.session_start_limit.max_concurrency,
        })
    }

    /// Spawns and connects every shard, provided the session budget covers them.
    pub async fn connect(&self) -> Result<(), FleetError> {
        let shard_count = self.shard_count().await?;
        let info = self.fetch_gateway_information(false).await?;

        let limit = &info.session_start_limit;
        if limit.remaining < shard_count {
            let resets_in = TimeDelta::from_std(Duration::from_millis(limit.reset_after))
                .unwrap_or_default();
            return Err(FleetError::InsufficientSessions {
                required: shard_count,
                remaining: limit.remaining,
                resets_at: Utc::now() + resets_in,
            });
        }

        info!(shard_count, "connecting fleet");
        self.update_shard_count(NonZeroU32::new(shard_count)).await?;
        self.strategy().connect().await
    }

    pub async fn destroy(&self, options: DestroyOptions) -> Result<(), FleetError> {
        info!(reason = ?options.reason, "destroying fleet");
        self.strategy().destroy(options).await
    }

    pub async fn send(&self, shard_id: u32, payload: GatewayPayload) -> Result<(), FleetError> {
        self.strategy().send(shard_id, payload).await
    }
}

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;

use crate::FleetError;

/// How a shard (or the whole fleet) should shut down.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DestroyOptions {
    pub reason: Option<String>,
    /// Close code sent to the gateway.
    pub code: Option<u16>,
}

impl DestroyOptions {
    pub fn with_reason(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            code: None,
        }
    }
}

/// A payload sent to the gateway by a shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayPayload {
    pub op: u8,
    pub d: serde_json::Value,
}

/// Everything a strategy needs to bring up a set of shards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnPlan {
    pub shard_ids: Vec<u32>,
    /// Total shard count across every fleet of the application.
    pub shard_count: u32,
    pub gateway_url: String,
    pub max_concurrency: u32,
}

/// The backend that actually runs shards.
///
/// The fleet decides when each operation happens and with what arguments; the
/// strategy decides how, e.g. in process, in worker processes or remotely.
#[async_trait]
pub trait ShardingStrategy: Send + Sync {
    /// Creates (but does not connect) the shards in `plan`.
    async fn spawn(&self, plan: SpawnPlan) -> Result<(), FleetError>;

    /// Connects every spawned shard.
    async fn connect(&self) -> Result<(), FleetError>;

    /// Shuts every shard down.
    async fn destroy(&self, options: DestroyOptions) -> Result<(), FleetError>;

    async fn send(&self, shard_id: u32, payload: GatewayPayload) -> Result<(), FleetError>;
}

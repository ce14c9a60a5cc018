use chrono::DateTime;
use chrono::Utc;
use tower::BoxError;
use tower_bucket::RestError;

/// Errors produced by the shard fleet.
#[derive(Debug, thiserror::Error)]
pub enum FleetError {
    /// Connecting would start more sessions than the gateway allows right now.
    #[error(
        "not enough sessions remaining to spawn {required} shards; only {remaining} remaining; resets at {resets_at}"
    )]
    InsufficientSessions {
        required: u32,
        remaining: u32,
        resets_at: DateTime<Utc>,
    },

    /// The fleet options describe an impossible topology.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Fetching gateway information through the scheduler failed.
    #[error(transparent)]
    Rest(#[from] RestError),

    /// A gateway information source other than the scheduler failed.
    #[error("gateway information unavailable: {0}")]
    Gateway(String),

    #[error("shard {0} is not managed by this fleet")]
    UnknownShard(u32),

    #[error("shard {shard_id} failed: {source}")]
    Shard {
        shard_id: u32,
        #[source]
        source: BoxError,
    },

    /// A session store hook failed.
    #[error("session store failed: {0}")]
    Session(#[source] BoxError),
}

//! # Shard Fleet
//!
//! `shard-fleet` decides which gateway shards a process runs and drives them
//! through their lifecycle. It does not open connections: a [`ShardingStrategy`]
//! does that, and [`SimpleShardingStrategy`] runs every shard in process through a
//! user supplied [`ShardFactory`].
//!
//! - Gateway information (`GET /gateway/bot`) is cached by [`GatewayInfoCache`] until
//!   its session start budget resets. A [`tower_bucket::Rest`] scheduler is a
//!   [`GatewayInfoSource`] out of the box.
//! - [`ShardFleet`] resolves the shard ids and total shard count from its
//!   [`FleetOptions`], refuses to connect when the session budget is short, and
//!   respawns the whole set when the shard count changes.
//! - [`IdentifyThrottler`] keeps identifies on the same concurrency key at least
//!   [`IDENTIFY_INTERVAL`] apart.

mod error;
mod gateway;
mod manager;
mod session;
mod shards;
mod simple;
mod strategy;
mod throttle;


pub use error::FleetError;
pub use gateway::GatewayInfo;
pub use gateway::GatewayInfoCache;
pub use gateway::GatewayInfoSource;
pub use gateway::SessionStartLimit;
pub use manager::FleetOptions;
pub use manager::ShardFleet;
pub use session::MemorySessionStore;
pub use session::SessionInfo;
pub use session::SessionStore;
pub use shards::ShardIds;
pub use simple::Shard;
pub use simple::ShardContext;
pub use simple::ShardFactory;
pub use simple::SimpleShardingStrategy;
pub use strategy::DestroyOptions;
pub use strategy::GatewayPayload;
pub use strategy::ShardingStrategy;
pub use strategy::SpawnPlan;
pub use throttle::IDENTIFY_INTERVAL;
pub use throttle::IdentifyThrottler;

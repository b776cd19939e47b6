//! # gateway-client
//!
//! Sharded client for the real-time gateway: per-shard resumable sessions,
//! in-process and worker-isolated sharding strategies, and the fleet
//! coordinator that ties them together.

pub mod backoff;
pub mod events;
pub mod heartbeat;
pub mod manager;
pub mod rest;
pub mod shard;
pub mod strategy;
pub mod throttle;

pub use events::{ShardEvent, ShardMessage};
pub use manager::WebSocketManager;
pub use rest::{
    GatewayInformation, GatewayInformationProvider, HttpGatewayProvider, SessionStartLimit,
    StaticGatewayProvider,
};
pub use shard::{DestroyOptions, ShardHandle, ShardSession, ShardSessionOptions, ShardStatus};
pub use strategy::{ShardingStrategy, SimpleShardingStrategy, SpawnContext, WorkerShardingStrategy};
pub use throttle::IdentifyThrottle;

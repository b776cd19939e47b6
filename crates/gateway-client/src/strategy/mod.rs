//! Sharding strategies
//!
//! A strategy decides where shard sessions live: on the caller's runtime
//! ([`SimpleShardingStrategy`]) or isolated on dedicated worker threads
//! ([`WorkerShardingStrategy`]). The fleet coordinator talks to either
//! through the same trait.

pub mod protocol;

mod simple;
mod worker;

pub use simple::SimpleShardingStrategy;
pub use worker::WorkerShardingStrategy;

use crate::events::ShardMessage;
use crate::shard::{DestroyOptions, ShardStatus};
use crate::throttle::IdentifyThrottle;
use async_trait::async_trait;
use gateway_common::{GatewayConfig, GatewayResult};
use gateway_protocol::{GatewayMessage, SessionInfo, ShardId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Everything a strategy needs to spawn its shards
#[derive(Debug, Clone)]
pub struct SpawnContext {
    /// Shards this strategy is responsible for
    pub shard_ids: Vec<ShardId>,

    /// Total shard count across the fleet
    pub shard_count: u32,

    /// Gateway URL for fresh connections
    pub gateway_url: String,

    /// Shared client configuration
    pub config: Arc<GatewayConfig>,

    /// Fleet-wide identify admission gate
    pub throttle: Arc<IdentifyThrottle>,

    /// Where shard events are delivered
    pub events: mpsc::UnboundedSender<ShardMessage>,
}

/// Owns shard sessions on behalf of the fleet coordinator
#[async_trait]
pub trait ShardingStrategy: Send + Sync {
    /// Create the shard sessions (without connecting them)
    async fn spawn(&mut self, context: SpawnContext) -> GatewayResult<()>;

    /// Connect every spawned shard and wait until all are ready
    async fn connect(&mut self) -> GatewayResult<()>;

    /// Send a payload over one shard's socket
    async fn send(&self, shard_id: ShardId, message: GatewayMessage) -> GatewayResult<()>;

    /// Close every shard and release its resources
    async fn destroy(&mut self, options: DestroyOptions) -> GatewayResult<()>;

    /// Snapshot the status of every shard
    async fn fetch_status(&self) -> GatewayResult<HashMap<ShardId, ShardStatus>>;

    /// Snapshot the session info of every shard
    async fn fetch_session_info(&self) -> GatewayResult<HashMap<ShardId, Option<SessionInfo>>>;
}

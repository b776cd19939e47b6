//! In-process sharding strategy

use crate::shard::{DestroyOptions, ShardHandle, ShardSession, ShardSessionOptions, ShardStatus};
use crate::strategy::{ShardingStrategy, SpawnContext};
use async_trait::async_trait;
use dashmap::DashMap;
use gateway_common::{GatewayError, GatewayResult};
use gateway_protocol::{GatewayMessage, SessionInfo, ShardId};
use std::collections::HashMap;
use std::time::Duration;
use tracing::info;

/// How long a connecting shard gets to reach ready
const READY_TIMEOUT: Duration = Duration::from_secs(60);

/// Runs every shard session as a task on the caller's runtime
///
/// The default strategy: cheapest, no isolation. A panic or stall in one
/// consumer affects all shards equally because they share the runtime.
#[derive(Debug)]
pub struct SimpleShardingStrategy {
    shards: DashMap<ShardId, ShardHandle>,
    ready_timeout: Duration,
}

impl SimpleShardingStrategy {
    /// Create an empty strategy
    #[must_use]
    pub fn new() -> Self {
        Self::with_ready_timeout(READY_TIMEOUT)
    }

    /// Create a strategy with an explicit ready deadline
    #[must_use]
    pub fn with_ready_timeout(ready_timeout: Duration) -> Self {
        Self {
            shards: DashMap::new(),
            ready_timeout,
        }
    }

    fn handle_for(&self, shard_id: ShardId) -> GatewayResult<dashmap::mapref::one::Ref<'_, ShardId, ShardHandle>> {
        self.shards
            .get(&shard_id)
            .ok_or(GatewayError::ShardNotFound(shard_id))
    }
}

impl Default for SimpleShardingStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ShardingStrategy for SimpleShardingStrategy {
    async fn spawn(&mut self, context: SpawnContext) -> GatewayResult<()> {
        info!(shards = context.shard_ids.len(), "spawning in-process shard sessions");

        for shard_id in &context.shard_ids {
            let handle = ShardSession::spawn(
                ShardSessionOptions {
                    shard_id: *shard_id,
                    shard_count: context.shard_count,
                    gateway_url: context.gateway_url.clone(),
                    config: context.config.clone(),
                    throttle: context.throttle.clone(),
                },
                context.events.clone(),
            );
            self.shards.insert(*shard_id, handle);
        }
        Ok(())
    }

    async fn connect(&mut self) -> GatewayResult<()> {
        // Kick every shard off first so identifies overlap where the
        // throttle allows, then wait for all of them
        for entry in self.shards.iter() {
            entry.value().connect()?;
        }

        for entry in self.shards.iter() {
            tokio::time::timeout(self.ready_timeout, entry.value().wait_until_ready())
                .await
                .map_err(|_| GatewayError::Timeout("shard ready"))??;
        }
        Ok(())
    }

    async fn send(&self, shard_id: ShardId, message: GatewayMessage) -> GatewayResult<()> {
        self.handle_for(shard_id)?.send(message)
    }

    async fn destroy(&mut self, options: DestroyOptions) -> GatewayResult<()> {
        info!(shards = self.shards.len(), "destroying in-process shard sessions");

        let shard_ids: Vec<ShardId> = self.shards.iter().map(|entry| *entry.key()).collect();
        for shard_id in shard_ids {
            if let Some((_, handle)) = self.shards.remove(&shard_id) {
                // The session may already be gone; destroy is best effort
                let _ = handle.destroy(options.clone());
                handle.join().await;
            }
        }
        Ok(())
    }

    async fn fetch_status(&self) -> GatewayResult<HashMap<ShardId, ShardStatus>> {
        Ok(self
            .shards
            .iter()
            .map(|entry| (*entry.key(), entry.value().status()))
            .collect())
    }

    async fn fetch_session_info(&self) -> GatewayResult<HashMap<ShardId, Option<SessionInfo>>> {
        Ok(self
            .shards
            .iter()
            .map(|entry| (*entry.key(), entry.value().session_info()))
            .collect())
    }
}

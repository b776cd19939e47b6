//! Fleet coordinator
//!
//! [`WebSocketManager`] owns the whole shard fleet: it fetches gateway
//! metadata, resolves the shard count, gates identifies through the shared
//! throttle, and exposes one merged event stream tagged with shard ids.

use crate::events::{ShardEvent, ShardMessage};
use crate::rest::{GatewayInformationProvider, HttpGatewayProvider};
use crate::shard::{DestroyOptions, ShardStatus};
use crate::strategy::{ShardingStrategy, SimpleShardingStrategy, SpawnContext};
use crate::throttle::IdentifyThrottle;
use dashmap::DashMap;
use gateway_common::{GatewayConfig, GatewayError, GatewayResult};
use gateway_protocol::{GatewayMessage, SessionInfo, ShardId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Coordinates a fleet of shard connections
///
/// Construction is cheap and offline; nothing touches the network until
/// [`WebSocketManager::connect`].
pub struct WebSocketManager {
    config: Arc<GatewayConfig>,
    provider: Arc<dyn GatewayInformationProvider>,
    strategy: Box<dyn ShardingStrategy>,
    shard_count: Option<u32>,
    shard_ids: Vec<ShardId>,
    latencies: Arc<DashMap<ShardId, Duration>>,
    event_tx: mpsc::UnboundedSender<ShardMessage>,
    event_rx: Option<mpsc::UnboundedReceiver<ShardMessage>>,
    relay: Option<JoinHandle<()>>,
}

impl WebSocketManager {
    /// Create a manager with the default HTTP metadata source and the
    /// in-process sharding strategy
    #[must_use]
    pub fn new(config: GatewayConfig) -> Self {
        let provider = HttpGatewayProvider::new(config.api_url.clone(), config.token.clone());
        Self::with_parts(config, Arc::new(provider), Box::new(SimpleShardingStrategy::new()))
    }

    /// Create a manager with explicit collaborators
    ///
    /// Tests inject a fixed metadata provider here; production callers swap
    /// the strategy for [`crate::WorkerShardingStrategy`].
    #[must_use]
    pub fn with_parts(
        config: GatewayConfig,
        provider: Arc<dyn GatewayInformationProvider>,
        strategy: Box<dyn ShardingStrategy>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            config: Arc::new(config),
            provider,
            strategy,
            shard_count: None,
            shard_ids: Vec::new(),
            latencies: Arc::new(DashMap::new()),
            event_tx,
            event_rx: Some(event_rx),
            relay: None,
        }
    }

    /// Spawn and connect the whole fleet, waiting until every shard is ready
    ///
    /// Gateway metadata is fetched fresh on every call so the fleet always
    /// starts against the currently advertised URL and identify budget.
    pub async fn connect(&mut self) -> GatewayResult<()> {
        let information = self.provider.gateway_information().await?;

        let shard_count = resolve_shard_count(&self.config, information.shards);
        let shard_ids: Vec<ShardId> = (0..shard_count).collect();

        let limit = &information.session_start_limit;
        if limit.remaining < shard_count {
            return Err(GatewayError::SessionStartLimit {
                remaining: limit.remaining,
                total: limit.total,
                reset_after_ms: limit.reset_after,
            });
        }

        info!(
            shard_count,
            recommended = information.shards,
            max_concurrency = limit.max_concurrency,
            remaining_starts = limit.remaining,
            "connecting gateway fleet"
        );

        let throttle = Arc::new(IdentifyThrottle::new(limit.max_concurrency));

        // Raw shard traffic passes through the relay so latencies stay
        // observable even when the consumer lags
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        if self.relay.is_none() {
            self.relay = Some(spawn_relay(
                Arc::clone(&self.latencies),
                raw_rx,
                self.event_tx.clone(),
            ));
        }

        self.strategy
            .spawn(SpawnContext {
                shard_ids: shard_ids.clone(),
                shard_count,
                gateway_url: information.url,
                config: Arc::clone(&self.config),
                throttle,
                events: raw_tx,
            })
            .await?;

        self.shard_count = Some(shard_count);
        self.shard_ids = shard_ids;

        self.strategy.connect().await
    }

    /// Take the merged event stream
    ///
    /// Yields `(shard_id, event)` pairs from every shard. Can be taken once.
    pub fn take_event_stream(&mut self) -> Option<mpsc::UnboundedReceiver<ShardMessage>> {
        self.event_rx.take()
    }

    /// Send a payload over one shard's socket
    pub async fn send(&self, shard_id: ShardId, message: GatewayMessage) -> GatewayResult<()> {
        self.strategy.send(shard_id, message).await
    }

    /// Close every shard and release fleet resources
    pub async fn destroy(&mut self, options: DestroyOptions) -> GatewayResult<()> {
        info!("destroying gateway fleet");
        self.strategy.destroy(options).await?;

        if let Some(relay) = self.relay.take() {
            // The relay ends on its own once the shard senders are gone
            let _ = relay.await;
        }
        self.shard_count = None;
        self.shard_ids.clear();
        self.latencies.clear();
        Ok(())
    }

    /// Snapshot the status of every shard
    pub async fn fetch_status(&self) -> GatewayResult<HashMap<ShardId, ShardStatus>> {
        self.strategy.fetch_status().await
    }

    /// Snapshot the session info of every shard
    pub async fn fetch_session_info(&self) -> GatewayResult<HashMap<ShardId, Option<SessionInfo>>> {
        self.strategy.fetch_session_info().await
    }

    /// Resolved shard count, `None` before the first connect
    #[must_use]
    pub fn shard_count(&self) -> Option<u32> {
        self.shard_count
    }

    /// Shards this manager runs
    #[must_use]
    pub fn shard_ids(&self) -> &[ShardId] {
        &self.shard_ids
    }

    /// Last measured heartbeat latency of one shard
    #[must_use]
    pub fn latency(&self, shard_id: ShardId) -> Option<Duration> {
        self.latencies.get(&shard_id).map(|entry| *entry.value())
    }

    /// Average heartbeat latency across shards that have measured one
    #[must_use]
    pub fn ping(&self) -> Option<Duration> {
        let measured: Vec<Duration> = self
            .latencies
            .iter()
            .map(|entry| *entry.value())
            .collect();
        if measured.is_empty() {
            return None;
        }

        let total: Duration = measured.iter().sum();
        Some(total / u32::try_from(measured.len()).unwrap_or(u32::MAX))
    }
}

impl std::fmt::Debug for WebSocketManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketManager")
            .field("shard_count", &self.shard_count)
            .field("shard_ids", &self.shard_ids)
            .finish_non_exhaustive()
    }
}

/// Resolve the total shard count for this fleet
///
/// An explicit configured count wins. Otherwise the server's recommendation
/// (sized for 1000 guilds per shard) is rescaled to the configured guild
/// density. Either way the result is rounded up to the configured multiple.
fn resolve_shard_count(config: &GatewayConfig, recommended: u32) -> u32 {
    let base = config.shard_count.unwrap_or_else(|| {
        let per_shard = u64::from(config.guilds_per_shard.max(1));
        let scaled = (u64::from(recommended.max(1)) * 1000).div_ceil(per_shard);
        u32::try_from(scaled).unwrap_or(u32::MAX).max(1)
    });

    let multiple = config.shard_count_multiple.max(1);
    base.div_ceil(multiple) * multiple
}

fn spawn_relay(
    latencies: Arc<DashMap<ShardId, Duration>>,
    mut raw: mpsc::UnboundedReceiver<ShardMessage>,
    out: mpsc::UnboundedSender<ShardMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some((shard_id, event)) = raw.recv().await {
            if let ShardEvent::HeartbeatComplete { latency_ms, .. } = &event {
                latencies.insert(shard_id, Duration::from_millis(*latency_ms));
            }
            if out.send((shard_id, event)).is_err() {
                debug!("event consumer dropped, stopping relay");
                break;
            }
        }
    })
}

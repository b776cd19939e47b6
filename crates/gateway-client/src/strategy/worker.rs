//! Worker-isolated sharding strategy

use crate::shard::{DestroyOptions, ShardSession, ShardSessionOptions, ShardStatus};
use crate::strategy::protocol::{WorkerCommand, WorkerMessage};
use crate::strategy::{ShardingStrategy, SpawnContext};
use async_trait::async_trait;
use dashmap::DashMap;
use gateway_common::{GatewayError, GatewayResult};
use gateway_protocol::{GatewayMessage, SessionInfo, ShardId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// How long a worker gets to answer a snapshot request
const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a worker gets to bring its shard to ready
const CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

/// Handle to one worker thread
#[derive(Debug)]
struct WorkerHandle {
    commands: mpsc::UnboundedSender<WorkerCommand>,
    thread: Option<std::thread::JoinHandle<()>>,
}

/// Runs each shard session on its own thread with its own runtime
///
/// Heavy consumers on the parent runtime cannot starve shard heartbeats,
/// and a wedged worker degrades only its own shard: every request to a
/// worker carries a nonce and a deadline. A missed deadline never blocks
/// the fleet; snapshot maps simply leave the unresponsive shard out.
#[derive(Debug)]
pub struct WorkerShardingStrategy {
    workers: DashMap<ShardId, WorkerHandle>,
    pending: Arc<DashMap<u64, oneshot::Sender<WorkerMessage>>>,
    nonce: AtomicU64,
    fetch_timeout: Duration,
    connect_timeout: Duration,
    router: Option<tokio::task::JoinHandle<()>>,
}

impl WorkerShardingStrategy {
    /// Create a strategy with the default deadlines
    #[must_use]
    pub fn new() -> Self {
        Self::with_timeouts(FETCH_TIMEOUT, CONNECT_TIMEOUT)
    }

    /// Create a strategy with explicit deadlines
    #[must_use]
    pub fn with_timeouts(fetch_timeout: Duration, connect_timeout: Duration) -> Self {
        Self {
            workers: DashMap::new(),
            pending: Arc::new(DashMap::new()),
            nonce: AtomicU64::new(0),
            fetch_timeout,
            connect_timeout,
            router: None,
        }
    }

    fn next_nonce(&self) -> u64 {
        self.nonce.fetch_add(1, Ordering::Relaxed)
    }

    /// Send a nonce-carrying command and wait for its answer
    ///
    /// `None` means the worker is dead or missed the deadline; snapshot
    /// callers skip the shard, connect treats it as a startup failure.
    async fn request(
        &self,
        commands: &mpsc::UnboundedSender<WorkerCommand>,
        command: WorkerCommand,
        nonce: u64,
        deadline: Duration,
    ) -> Option<WorkerMessage> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.insert(nonce, reply_tx);

        if commands.send(command).is_err() {
            self.pending.remove(&nonce);
            return None;
        }

        match tokio::time::timeout(deadline, reply_rx).await {
            Ok(Ok(message)) => Some(message),
            _ => {
                self.pending.remove(&nonce);
                None
            }
        }
    }

    /// Forward worker traffic: events to the consumer, replies to their waiters
    async fn route(
        mut replies: mpsc::UnboundedReceiver<WorkerMessage>,
        pending: Arc<DashMap<u64, oneshot::Sender<WorkerMessage>>>,
        events: mpsc::UnboundedSender<crate::ShardMessage>,
    ) {
        while let Some(message) = replies.recv().await {
            match message {
                WorkerMessage::Event { shard_id, event } => {
                    let _ = events.send((shard_id, event));
                }
                reply => {
                    if let Some(nonce) = reply.nonce() {
                        if let Some((_, waiter)) = pending.remove(&nonce) {
                            let _ = waiter.send(reply);
                        } else {
                            debug!(nonce, "worker reply arrived after its deadline");
                        }
                    }
                }
            }
        }
    }
}

impl Default for WorkerShardingStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ShardingStrategy for WorkerShardingStrategy {
    async fn spawn(&mut self, context: SpawnContext) -> GatewayResult<()> {
        info!(shards = context.shard_ids.len(), "spawning worker-isolated shard sessions");

        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        self.router = Some(tokio::spawn(Self::route(
            reply_rx,
            Arc::clone(&self.pending),
            context.events.clone(),
        )));

        for shard_id in &context.shard_ids {
            let (command_tx, command_rx) = mpsc::unbounded_channel();
            let options = ShardSessionOptions {
                shard_id: *shard_id,
                shard_count: context.shard_count,
                gateway_url: context.gateway_url.clone(),
                config: context.config.clone(),
                throttle: context.throttle.clone(),
            };

            let replies = reply_tx.clone();
            let thread = std::thread::Builder::new()
                .name(format!("gateway-shard-{shard_id}"))
                .spawn(move || worker_main(options, command_rx, replies))
                .map_err(|_| GatewayError::ShardStartup(*shard_id))?;

            self.workers.insert(
                *shard_id,
                WorkerHandle {
                    commands: command_tx,
                    thread: Some(thread),
                },
            );
        }

        // The router ends once every worker's reply sender is gone
        drop(reply_tx);

        // Confirm each worker thread came up and hosts the shard it was handed
        for shard_id in &context.shard_ids {
            let commands = self
                .workers
                .get(shard_id)
                .map(|worker| worker.commands.clone())
                .ok_or(GatewayError::ShardStartup(*shard_id))?;

            let nonce = self.next_nonce();
            let reply = self
                .request(
                    &commands,
                    WorkerCommand::FetchShardIdentity { nonce },
                    nonce,
                    self.fetch_timeout,
                )
                .await;

            match reply {
                Some(WorkerMessage::ShardIdentityResult { shard_id: hosted, .. })
                    if hosted == *shard_id => {}
                _ => {
                    warn!(shard_id = %shard_id, "worker did not confirm its shard identity");
                    return Err(GatewayError::ShardStartup(*shard_id));
                }
            }
        }
        Ok(())
    }

    async fn connect(&mut self) -> GatewayResult<()> {
        let targets: Vec<(ShardId, mpsc::UnboundedSender<WorkerCommand>)> = self
            .workers
            .iter()
            .map(|entry| (*entry.key(), entry.value().commands.clone()))
            .collect();

        let this = &*self;
        let attempts = targets.into_iter().map(|(shard_id, commands)| async move {
            let nonce = this.next_nonce();
            let reply = this
                .request(
                    &commands,
                    WorkerCommand::Connect { nonce },
                    nonce,
                    this.connect_timeout,
                )
                .await;

            match reply {
                Some(WorkerMessage::ConnectResult { result: Ok(()), .. }) => Ok(()),
                Some(WorkerMessage::ConnectResult {
                    result: Err(reason),
                    ..
                }) => {
                    warn!(shard_id = %shard_id, %reason, "worker shard failed to connect");
                    Err(GatewayError::ShardStartup(shard_id))
                }
                _ => Err(GatewayError::ShardStartup(shard_id)),
            }
        });

        for result in futures_util::future::join_all(attempts).await {
            result?;
        }
        Ok(())
    }

    async fn send(&self, shard_id: ShardId, message: GatewayMessage) -> GatewayResult<()> {
        let worker = self
            .workers
            .get(&shard_id)
            .ok_or(GatewayError::ShardNotFound(shard_id))?;

        worker
            .commands
            .send(WorkerCommand::Send { message })
            .map_err(|_| GatewayError::ShardNotFound(shard_id))
    }

    async fn destroy(&mut self, options: DestroyOptions) -> GatewayResult<()> {
        info!(shards = self.workers.len(), "destroying worker-isolated shard sessions");

        let shard_ids: Vec<ShardId> = self.workers.iter().map(|entry| *entry.key()).collect();
        for shard_id in shard_ids {
            let Some((_, mut worker)) = self.workers.remove(&shard_id) else {
                continue;
            };

            let nonce = self.next_nonce();
            let reply = self
                .request(
                    &worker.commands,
                    WorkerCommand::Destroy {
                        nonce,
                        options: options.clone(),
                    },
                    nonce,
                    self.fetch_timeout,
                )
                .await;
            if reply.is_none() {
                warn!(shard_id = %shard_id, "worker did not confirm destroy");
            }

            // Closing the command channel ends the worker loop either way
            drop(worker.commands);
            if let Some(thread) = worker.thread.take() {
                let join = tokio::task::spawn_blocking(move || thread.join());
                if tokio::time::timeout(self.fetch_timeout, join).await.is_err() {
                    warn!(shard_id = %shard_id, "worker thread did not exit in time, detaching it");
                }
            }
        }

        // A detached worker may still hold a reply sender; don't wait on it
        if let Some(router) = self.router.take() {
            router.abort();
            let _ = router.await;
        }
        Ok(())
    }

    async fn fetch_status(&self) -> GatewayResult<HashMap<ShardId, ShardStatus>> {
        let targets: Vec<(ShardId, mpsc::UnboundedSender<WorkerCommand>)> = self
            .workers
            .iter()
            .map(|entry| (*entry.key(), entry.value().commands.clone()))
            .collect();

        let mut statuses = HashMap::new();
        let snapshots = targets.into_iter().map(|(shard_id, commands)| async move {
            let nonce = self.next_nonce();
            let reply = self
                .request(
                    &commands,
                    WorkerCommand::FetchStatus { nonce },
                    nonce,
                    self.fetch_timeout,
                )
                .await;
            (shard_id, reply)
        });

        for (shard_id, reply) in futures_util::future::join_all(snapshots).await {
            match reply {
                Some(WorkerMessage::StatusResult {
                    statuses: worker_statuses,
                    ..
                }) => statuses.extend(worker_statuses),
                // A dead or stalled worker is left out rather than guessed at
                _ => debug!(shard_id = %shard_id, "status snapshot missed its deadline"),
            }
        }
        Ok(statuses)
    }

    async fn fetch_session_info(&self) -> GatewayResult<HashMap<ShardId, Option<SessionInfo>>> {
        let targets: Vec<(ShardId, mpsc::UnboundedSender<WorkerCommand>)> = self
            .workers
            .iter()
            .map(|entry| (*entry.key(), entry.value().commands.clone()))
            .collect();

        let mut sessions = HashMap::new();
        let snapshots = targets.into_iter().map(|(shard_id, commands)| async move {
            let nonce = self.next_nonce();
            let reply = self
                .request(
                    &commands,
                    WorkerCommand::FetchSessionInfo { nonce },
                    nonce,
                    self.fetch_timeout,
                )
                .await;
            (shard_id, reply)
        });

        for (shard_id, reply) in futures_util::future::join_all(snapshots).await {
            match reply {
                Some(WorkerMessage::SessionInfoResult {
                    sessions: worker_sessions,
                    ..
                }) => sessions.extend(worker_sessions),
                _ => debug!(shard_id = %shard_id, "session info snapshot missed its deadline"),
            }
        }
        Ok(sessions)
    }
}

/// Worker thread body: a single-thread runtime hosting one shard session
fn worker_main(
    options: ShardSessionOptions,
    commands: mpsc::UnboundedReceiver<WorkerCommand>,
    replies: mpsc::UnboundedSender<WorkerMessage>,
) {
    let shard_id = options.shard_id;
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(shard_id = %shard_id, %err, "worker runtime construction failed");
            return;
        }
    };

    runtime.block_on(worker_loop(options, commands, replies));
    debug!(shard_id = %shard_id, "worker thread exiting");
}

async fn worker_loop(
    options: ShardSessionOptions,
    mut commands: mpsc::UnboundedReceiver<WorkerCommand>,
    replies: mpsc::UnboundedSender<WorkerMessage>,
) {
    let shard_id = options.shard_id;
    let shard_count = options.shard_count;
    let (event_tx, mut events) = mpsc::unbounded_channel();
    let mut handle = Some(ShardSession::spawn(options, event_tx));

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some((id, event)) => {
                    let _ = replies.send(WorkerMessage::Event { shard_id: id, event });
                }
                None => break,
            },
            command = commands.recv() => match command {
                Some(WorkerCommand::Connect { nonce }) => {
                    // The ready-wait runs as its own task; a shard stuck in
                    // its reconnect loop must not wedge command handling
                    match handle.as_ref() {
                        Some(shard) => match shard.connect() {
                            Ok(()) => {
                                let ready = shard.ready_wait();
                                let replies = replies.clone();
                                tokio::spawn(async move {
                                    let result = ready.await.map_err(|err| err.to_string());
                                    let _ = replies
                                        .send(WorkerMessage::ConnectResult { nonce, result });
                                });
                            }
                            Err(err) => {
                                let _ = replies.send(WorkerMessage::ConnectResult {
                                    nonce,
                                    result: Err(err.to_string()),
                                });
                            }
                        },
                        None => {
                            let _ = replies.send(WorkerMessage::ConnectResult {
                                nonce,
                                result: Err("shard already destroyed".to_string()),
                            });
                        }
                    }
                }
                Some(WorkerCommand::Send { message }) => {
                    if let Some(shard) = handle.as_ref() {
                        let _ = shard.send(message);
                    }
                }
                Some(WorkerCommand::FetchStatus { nonce }) => {
                    let statuses = handle
                        .as_ref()
                        .map(|shard| HashMap::from([(shard_id, shard.status())]))
                        .unwrap_or_default();
                    let _ = replies.send(WorkerMessage::StatusResult { nonce, statuses });
                }
                Some(WorkerCommand::FetchSessionInfo { nonce }) => {
                    let sessions = handle
                        .as_ref()
                        .map(|shard| HashMap::from([(shard_id, shard.session_info())]))
                        .unwrap_or_default();
                    let _ = replies.send(WorkerMessage::SessionInfoResult { nonce, sessions });
                }
                Some(WorkerCommand::FetchShardIdentity { nonce }) => {
                    let _ = replies.send(WorkerMessage::ShardIdentityResult {
                        nonce,
                        shard_id,
                        shard_count,
                    });
                }
                Some(WorkerCommand::Destroy { nonce, options }) => {
                    if let Some(shard) = handle.take() {
                        let _ = shard.destroy(options);
                        shard.join().await;
                    }
                    // Relay whatever the session emitted while closing
                    while let Ok((id, event)) = events.try_recv() {
                        let _ = replies.send(WorkerMessage::Event { shard_id: id, event });
                    }
                    let _ = replies.send(WorkerMessage::DestroyResult { nonce });
                    break;
                }
                None => {
                    if let Some(shard) = handle.take() {
                        let _ = shard.destroy(DestroyOptions::default());
                        shard.join().await;
                    }
                    break;
                }
            },
        }
    }
}

//! Shard sessions
//!
//! One shard owns one physical socket connection and the session state
//! needed to resume it.

mod session;

pub use session::{ShardSession, ShardSessionOptions};

use gateway_common::{GatewayError, GatewayResult};
use gateway_protocol::{GatewayMessage, SessionInfo, ShardId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Lifecycle status of one shard
///
/// Written only by the owning session; read elsewhere through a watch
/// channel, so observers always see a complete snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShardStatus {
    /// Created, not yet asked to connect
    Idle,
    /// Socket is being opened or the hello payload is awaited
    Connecting,
    /// Resume handshake in flight
    Resuming,
    /// Identify handshake in flight (or awaiting admission)
    Identifying,
    /// Session is live and dispatching
    Ready,
    /// Terminal; no automatic reconnect will follow
    Disconnected,
}

/// Options for a destroy request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestroyOptions {
    /// Close code to send to the server
    pub code: u16,

    /// Close reason
    pub reason: String,
}

impl Default for DestroyOptions {
    fn default() -> Self {
        Self {
            code: 1000,
            reason: String::new(),
        }
    }
}

/// Commands accepted by a running shard session
#[derive(Debug)]
pub(crate) enum SessionCommand {
    /// Open the socket and start the handshake
    Connect,
    /// Send a payload over the live socket
    Send(GatewayMessage),
    /// Close the socket and stop (terminal)
    Destroy(DestroyOptions),
}

/// Handle to a spawned shard session
///
/// Commands flow in over a channel; status and session info are read
/// through their own snapshot cells. Dropping the handle does not stop the
/// session; send a destroy first.
#[derive(Debug)]
pub struct ShardHandle {
    shard_id: ShardId,
    commands: mpsc::UnboundedSender<SessionCommand>,
    status: watch::Receiver<ShardStatus>,
    session: Arc<parking_lot::Mutex<Option<SessionInfo>>>,
    task: JoinHandle<()>,
}

impl ShardHandle {
    pub(crate) fn new(
        shard_id: ShardId,
        commands: mpsc::UnboundedSender<SessionCommand>,
        status: watch::Receiver<ShardStatus>,
        session: Arc<parking_lot::Mutex<Option<SessionInfo>>>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            shard_id,
            commands,
            status,
            session,
            task,
        }
    }

    /// Shard this handle controls
    #[must_use]
    pub fn shard_id(&self) -> ShardId {
        self.shard_id
    }

    /// Ask the session to open its socket
    pub fn connect(&self) -> GatewayResult<()> {
        self.command(SessionCommand::Connect)
    }

    /// Send a payload over the shard's socket
    pub fn send(&self, message: GatewayMessage) -> GatewayResult<()> {
        self.command(SessionCommand::Send(message))
    }

    /// Close the shard's socket and stop the session
    pub fn destroy(&self, options: DestroyOptions) -> GatewayResult<()> {
        self.command(SessionCommand::Destroy(options))
    }

    /// Current status snapshot
    #[must_use]
    pub fn status(&self) -> ShardStatus {
        *self.status.borrow()
    }

    /// Current session info snapshot
    #[must_use]
    pub fn session_info(&self) -> Option<SessionInfo> {
        self.session.lock().clone()
    }

    /// Wait until the shard reaches `Ready`
    ///
    /// Fails if the session stops before it gets there.
    pub async fn wait_until_ready(&self) -> GatewayResult<()> {
        self.ready_wait().await
    }

    /// Future resolving when the shard reaches `Ready`, detached from the handle
    ///
    /// The returned future owns its own status receiver, so it can outlive
    /// the borrow and run concurrently with other handle calls.
    #[must_use]
    pub fn ready_wait(&self) -> impl std::future::Future<Output = GatewayResult<()>> + Send + 'static {
        let shard_id = self.shard_id;
        let mut status = self.status.clone();
        async move {
            loop {
                match *status.borrow_and_update() {
                    ShardStatus::Ready => return Ok(()),
                    ShardStatus::Disconnected => return Err(GatewayError::ShardStartup(shard_id)),
                    _ => {}
                }

                if status.changed().await.is_err() {
                    return Err(GatewayError::ShardStartup(shard_id));
                }
            }
        }
    }

    /// Wait for the session task to finish (after a destroy)
    pub async fn join(self) {
        let _ = self.task.await;
    }

    fn command(&self, command: SessionCommand) -> GatewayResult<()> {
        self.commands
            .send(command)
            .map_err(|_| GatewayError::ShardNotFound(self.shard_id))
    }
}

//! Worker message protocol
//!
//! Messages exchanged between the parent runtime and isolated shard
//! workers. Requests that expect an answer carry a nonce; the parent
//! correlates replies by nonce so a slow worker never blocks an unrelated
//! request.

use crate::events::ShardEvent;
use crate::shard::{DestroyOptions, ShardStatus};
use gateway_protocol::{GatewayMessage, SessionInfo, ShardId};
use std::collections::HashMap;

/// Parent-to-worker requests
#[derive(Debug)]
pub enum WorkerCommand {
    /// Connect the worker's shard and wait for ready
    Connect { nonce: u64 },

    /// Send a payload; fire and forget
    Send { message: GatewayMessage },

    /// Close the shard and shut the worker down
    Destroy { nonce: u64, options: DestroyOptions },

    /// Snapshot shard statuses
    FetchStatus { nonce: u64 },

    /// Snapshot shard session info
    FetchSessionInfo { nonce: u64 },

    /// Ask which shard this worker hosts (spawn-time liveness handshake)
    FetchShardIdentity { nonce: u64 },
}

/// Worker-to-parent messages
#[derive(Debug)]
pub enum WorkerMessage {
    /// A shard event to relay to the consumer
    Event { shard_id: ShardId, event: ShardEvent },

    /// Answer to [`WorkerCommand::Connect`]
    ConnectResult {
        nonce: u64,
        /// Stringly typed: errors crossing the worker boundary lose structure
        result: Result<(), String>,
    },

    /// Answer to [`WorkerCommand::Destroy`]; the worker exits after sending it
    DestroyResult { nonce: u64 },

    /// Answer to [`WorkerCommand::FetchStatus`]
    StatusResult {
        nonce: u64,
        statuses: HashMap<ShardId, ShardStatus>,
    },

    /// Answer to [`WorkerCommand::FetchSessionInfo`]
    SessionInfoResult {
        nonce: u64,
        sessions: HashMap<ShardId, Option<SessionInfo>>,
    },

    /// Answer to [`WorkerCommand::FetchShardIdentity`]
    ShardIdentityResult {
        nonce: u64,
        shard_id: ShardId,
        shard_count: u32,
    },
}

impl WorkerMessage {
    /// Nonce this message answers, if it answers one
    #[must_use]
    pub fn nonce(&self) -> Option<u64> {
        match self {
            Self::Event { .. } => None,
            Self::ConnectResult { nonce, .. }
            | Self::DestroyResult { nonce }
            | Self::StatusResult { nonce, .. }
            | Self::SessionInfoResult { nonce, .. }
            | Self::ShardIdentityResult { nonce, .. } => Some(*nonce),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nonce_extraction() {
        let reply = WorkerMessage::DestroyResult { nonce: 9 };
        assert_eq!(reply.nonce(), Some(9));

        let event = WorkerMessage::Event {
            shard_id: 0,
            event: ShardEvent::Resumed,
        };
        assert_eq!(event.nonce(), None);
    }
}

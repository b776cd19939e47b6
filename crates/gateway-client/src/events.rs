//! Shard events
//!
//! Typed events flowing from shard sessions up to the fleet coordinator and
//! on to the consuming client. Each owning component holds its own channel;
//! there is no shared ambient bus.

use gateway_common::GatewayError;
use gateway_protocol::{GatewayEventType, ShardId};
use serde_json::Value;

/// Event emitted by a single shard session
#[derive(Debug)]
pub enum ShardEvent {
    /// A dispatch payload, forwarded untouched
    Dispatch {
        /// Parsed event tag, `None` for tags this library does not know
        event: Option<GatewayEventType>,
        /// Raw event name from the `t` field
        name: String,
        /// Sequence number of this dispatch
        seq: Option<u64>,
        /// Raw payload
        data: Value,
    },

    /// The shard completed a fresh identify handshake
    Ready {
        /// Raw READY payload
        data: Value,
    },

    /// The shard resumed an existing session
    Resumed,

    /// A heartbeat round-trip completed
    HeartbeatComplete {
        /// Unix timestamp (ms) when the acknowledgement arrived
        heartbeat_at: i64,
        /// Round-trip latency in milliseconds
        latency_ms: u64,
    },

    /// The socket closed with the given code
    Closed {
        /// Close code (0 when the peer sent no close frame)
        code: u16,
    },

    /// Diagnostic message
    Debug {
        message: String,
    },

    /// Fatal shard error; the shard has stopped
    Error {
        error: GatewayError,
    },
}

/// A shard event tagged with its originating shard
pub type ShardMessage = (ShardId, ShardEvent);

impl ShardEvent {
    /// Short name for logging
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Dispatch { .. } => "Dispatch",
            Self::Ready { .. } => "Ready",
            Self::Resumed => "Resumed",
            Self::HeartbeatComplete { .. } => "HeartbeatComplete",
            Self::Closed { .. } => "Closed",
            Self::Debug { .. } => "Debug",
            Self::Error { .. } => "Error",
        }
    }
}

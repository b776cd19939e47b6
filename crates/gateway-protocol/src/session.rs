//! Session state
//!
//! Data carried across socket replacements so a dropped connection can be resumed.

use serde::{Deserialize, Serialize};

/// Identifier of one shard, `0 <= id < shard_count`.
pub type ShardId = u32;

/// Everything a shard needs to resume a session after a disconnect.
///
/// Owned exclusively by its shard; serializable so a hosting strategy can
/// persist it opaquely and hand it to a replacement process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Session ID issued by the Ready dispatch
    pub session_id: String,

    /// Last dispatch sequence number seen, if any
    pub sequence: Option<u64>,

    /// Gateway URL to reconnect to for resuming
    pub resume_url: String,

    /// Shard this session belongs to
    pub shard_id: ShardId,

    /// Total shard count the session was identified with
    pub shard_count: u32,
}

impl SessionInfo {
    /// Sequence number to send in a resume payload (0 when nothing was dispatched yet)
    #[must_use]
    pub fn resume_sequence(&self) -> u64 {
        self.sequence.unwrap_or(0)
    }
}

//! Gateway error types
//!
//! Unified error handling for the gateway client. Recoverable conditions
//! (resumable closes, garbage frames, heartbeat timeouts) never surface
//! here; this type covers the fatal and caller-facing classes only.

use crate::config::ConfigError;
use gateway_protocol::{CloseCode, CodecError, ShardId};

/// Result alias for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Gateway-wide error type
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    // Fatal close classes
    #[error("Authentication failed, the token is invalid")]
    AuthenticationFailed,

    #[error("Requested intents are not allowed for this token")]
    DisallowedIntents,

    #[error("Invalid shard configuration")]
    InvalidShard,

    #[error("Gateway closed the connection with fatal code {0}")]
    FatalClose(CloseCode),

    // Fleet startup
    #[error("Session start limit reached: {remaining}/{total} starts remaining, resets in {reset_after_ms}ms")]
    SessionStartLimit {
        remaining: u32,
        total: u32,
        reset_after_ms: u64,
    },

    #[error("Shard {0} failed before becoming ready")]
    ShardStartup(ShardId),

    #[error("Shard {0} is not known to this fleet")]
    ShardNotFound(ShardId),

    // Collaborators
    #[error("Gateway metadata fetch failed: {0}")]
    GatewayInformation(String),

    // Ambient
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),
}

impl GatewayError {
    /// Map a fatal close code to its specific error variant
    ///
    /// Callers should only pass codes for which [`CloseCode::is_fatal`] holds;
    /// other codes map to the generic [`GatewayError::FatalClose`].
    #[must_use]
    pub fn from_close_code(code: CloseCode) -> Self {
        match code {
            CloseCode::AuthenticationFailed => Self::AuthenticationFailed,
            CloseCode::InvalidIntents | CloseCode::DisallowedIntents => Self::DisallowedIntents,
            CloseCode::InvalidShard | CloseCode::ShardingRequired => Self::InvalidShard,
            other => Self::FatalClose(other),
        }
    }

    /// Whether this error condemns the whole fleet rather than one shard
    #[must_use]
    pub fn is_fleet_fatal(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed
                | Self::DisallowedIntents
                | Self::InvalidShard
                | Self::SessionStartLimit { .. }
        )
    }
}

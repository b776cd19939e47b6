//! Handshake payload definitions
//!
//! Payload structures for the connect/identify/resume handshake.

use crate::intents::GatewayIntents;
use crate::session::ShardId;
use serde::{Deserialize, Serialize};

/// Payload for op 10 (Hello)
///
/// Received from the server immediately after the socket opens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloPayload {
    /// Heartbeat interval in milliseconds
    pub heartbeat_interval: u64,
}

/// Payload for op 2 (Identify)
///
/// Sent by the client to establish a brand-new session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyPayload {
    /// Authentication token
    pub token: String,

    /// Client properties
    pub properties: IdentifyProperties,

    /// Event-family subscriptions
    pub intents: GatewayIntents,

    /// `[shard_id, shard_count]` pair
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shard: Option<[u32; 2]>,

    /// Whether the server may compress the initial payload burst
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    pub compress: bool,
}

/// Client connection properties
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyProperties {
    /// Operating system
    pub os: String,

    /// Library or client name
    pub browser: String,

    /// Device type
    pub device: String,
}

impl IdentifyProperties {
    /// Properties describing this library on the current platform
    #[must_use]
    pub fn new() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            browser: "gateway-client".to_string(),
            device: "gateway-client".to_string(),
        }
    }

    /// Set operating system
    #[must_use]
    pub fn with_os(mut self, os: impl Into<String>) -> Self {
        self.os = os.into();
        self
    }

    /// Set browser
    #[must_use]
    pub fn with_browser(mut self, browser: impl Into<String>) -> Self {
        self.browser = browser.into();
        self
    }

    /// Set device type
    #[must_use]
    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = device.into();
        self
    }
}

impl Default for IdentifyProperties {
    fn default() -> Self {
        Self::new()
    }
}

/// Payload for op 6 (Resume)
///
/// Sent by the client to resume a disconnected session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumePayload {
    /// Authentication token
    pub token: String,

    /// Session ID to resume
    pub session_id: String,

    /// Last received sequence number
    pub seq: u64,
}

/// Payload of the `READY` dispatch
///
/// Received after a successful identify; carries the session coordinates
/// needed for later resumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyPayload {
    /// Gateway protocol version
    pub v: u8,

    /// Session ID for this connection
    pub session_id: String,

    /// Gateway URL to use when resuming this session
    pub resume_gateway_url: String,

    /// `[shard_id, shard_count]` pair echoed back
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shard: Option<[ShardId; 2]>,
}

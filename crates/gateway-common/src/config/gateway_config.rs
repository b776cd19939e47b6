//! Gateway client configuration
//!
//! Loads configuration from environment variables with sensible defaults.

use gateway_protocol::{CompressionMethod, GatewayIntents, IdentifyProperties};
use serde::Deserialize;
use std::env;
use std::time::Duration;

/// Gateway client configuration
///
/// Everything a fleet needs to connect: credentials, sharding preferences,
/// and compression negotiation.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Authentication token
    pub token: String,

    /// Base URL of the REST API (gateway metadata fetch)
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Gateway URL to connect to when no resume URL is known
    ///
    /// Normally overridden by the URL returned from the gateway metadata fetch.
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,

    /// Gateway protocol version
    #[serde(default = "default_version")]
    pub version: u8,

    /// Event-family subscriptions sent in the identify payload
    #[serde(default)]
    pub intents: GatewayIntents,

    /// Explicit shard count; `None` resolves from the recommended count
    #[serde(default)]
    pub shard_count: Option<u32>,

    /// Target guilds per shard when resolving the shard count automatically
    #[serde(default = "default_guilds_per_shard")]
    pub guilds_per_shard: u32,

    /// Resolved shard counts are rounded up to a multiple of this
    #[serde(default = "default_shard_count_multiple")]
    pub shard_count_multiple: u32,

    /// Transport compression over the socket's lifetime
    #[serde(default, deserialize_with = "deserialize_compression")]
    pub compression: Option<CompressionMethod>,

    /// One-shot compression of the initial identify payload burst
    #[serde(default)]
    pub identify_compress: bool,

    /// Client properties sent in the identify payload
    #[serde(default)]
    pub identify_properties: IdentifyProperties,

    /// How long to wait for the server's hello before giving up on a socket
    #[serde(default = "default_hello_timeout_secs")]
    pub hello_timeout_secs: u64,
}

impl GatewayConfig {
    /// Create a configuration with defaults for everything but the token
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            api_url: default_api_url(),
            gateway_url: default_gateway_url(),
            version: default_version(),
            intents: GatewayIntents::default(),
            shard_count: None,
            guilds_per_shard: default_guilds_per_shard(),
            shard_count_multiple: default_shard_count_multiple(),
            compression: None,
            identify_compress: false,
            identify_properties: IdentifyProperties::default(),
            hello_timeout_secs: default_hello_timeout_secs(),
        }
    }

    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if required environment variables are missing
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let compression = match env::var("GATEWAY_COMPRESSION").ok().as_deref() {
            None | Some("none") => None,
            Some("zlib-stream") => Some(CompressionMethod::ZlibStream),
            Some(other) => {
                return Err(ConfigError::InvalidValue(
                    "GATEWAY_COMPRESSION",
                    other.to_string(),
                ))
            }
        };

        Ok(Self {
            token: env::var("GATEWAY_TOKEN").map_err(|_| ConfigError::MissingVar("GATEWAY_TOKEN"))?,
            api_url: env::var("GATEWAY_API_URL").unwrap_or_else(|_| default_api_url()),
            gateway_url: env::var("GATEWAY_URL").unwrap_or_else(|_| default_gateway_url()),
            version: env::var("GATEWAY_VERSION")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(default_version),
            intents: env::var("GATEWAY_INTENTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(GatewayIntents::from_bits_truncate)
                .unwrap_or_default(),
            shard_count: env::var("GATEWAY_SHARD_COUNT").ok().and_then(|s| s.parse().ok()),
            guilds_per_shard: env::var("GATEWAY_GUILDS_PER_SHARD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(default_guilds_per_shard),
            shard_count_multiple: env::var("GATEWAY_SHARD_COUNT_MULTIPLE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(default_shard_count_multiple),
            compression,
            identify_compress: env::var("GATEWAY_IDENTIFY_COMPRESS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(false),
            identify_properties: IdentifyProperties::default(),
            hello_timeout_secs: env::var("GATEWAY_HELLO_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(default_hello_timeout_secs),
        })
    }

    /// Hello timeout as a [`Duration`]
    #[must_use]
    pub fn hello_timeout(&self) -> Duration {
        Duration::from_secs(self.hello_timeout_secs)
    }

    /// Effective identify-compression flag
    ///
    /// Transport compression covers every binary frame, so the one-shot
    /// identify compression is disabled when both are configured.
    #[must_use]
    pub fn effective_identify_compress(&self) -> bool {
        if self.identify_compress && self.compression.is_some() {
            tracing::warn!(
                "identify compression is ignored while transport compression is active"
            );
            return false;
        }
        self.identify_compress
    }
}

fn deserialize_compression<'de, D>(deserializer: D) -> Result<Option<CompressionMethod>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    match value.as_deref() {
        None | Some("none") => Ok(None),
        Some("zlib-stream") => Ok(Some(CompressionMethod::ZlibStream)),
        Some(other) => Err(serde::de::Error::custom(format!(
            "unknown compression method: {other}"
        ))),
    }
}

// Default value functions
fn default_api_url() -> String {
    "https://api.chat.example/v1".to_string()
}

fn default_gateway_url() -> String {
    "wss://gateway.chat.example".to_string()
}

fn default_version() -> u8 {
    10
}

fn default_guilds_per_shard() -> u32 {
    1000
}

fn default_shard_count_multiple() -> u32 {
    1
}

fn default_hello_timeout_secs() -> u64 {
    60
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}

//! Test fixtures
//!
//! Canned configuration and gateway metadata for fleet tests.

use gateway_client::{GatewayInformation, SessionStartLimit};
use gateway_common::GatewayConfig;

/// Configuration pointing at nothing in particular
///
/// Tests that talk to a mock gateway override the URL through the metadata
/// provider, so the configured URLs are never dialed.
pub fn test_config(shard_count: u32) -> GatewayConfig {
    let mut config = GatewayConfig::new("test-token");
    config.shard_count = Some(shard_count);
    config
}

/// Gateway metadata pointing at the given URL
///
/// `max_concurrency` is high so multi-shard tests do not serialize their
/// identifies through the five-second admission interval.
pub fn test_information(url: &str, shards: u32) -> GatewayInformation {
    GatewayInformation {
        url: url.to_string(),
        shards,
        session_start_limit: SessionStartLimit {
            total: 1000,
            remaining: 1000,
            reset_after: 14_400_000,
            max_concurrency: 16,
        },
    }
}

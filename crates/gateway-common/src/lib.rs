//! # gateway-common
//!
//! Shared utilities for the gateway client: configuration, error handling, and telemetry.

pub mod config;
pub mod error;
pub mod telemetry;

// Re-export commonly used types at crate root
pub use config::{ConfigError, GatewayConfig};
pub use error::{GatewayError, GatewayResult};
pub use telemetry::{init_tracing, init_tracing_with_config, try_init_tracing, TracingConfig};

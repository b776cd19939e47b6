//! Configuration
//!
//! Gateway client configuration loaded from the environment.

mod gateway_config;

pub use gateway_config::{ConfigError, GatewayConfig};

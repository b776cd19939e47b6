//! Error handling
//!
//! Unified error taxonomy for the gateway client.

mod gateway_error;

pub use gateway_error::{GatewayError, GatewayResult};

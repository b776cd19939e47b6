//! Integration test utilities for the gateway client
//!
//! This crate provides a scriptable in-process mock gateway server and
//! fixtures for running end-to-end tests against the shard fleet.

pub mod fixtures;
pub mod helpers;

pub use fixtures::*;
pub use helpers::*;

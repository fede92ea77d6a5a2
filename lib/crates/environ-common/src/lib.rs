//! Shared wire types and configuration for environ agents and their callers.

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod config;
pub mod keys;
pub mod topics;
pub mod types;

pub use config::{AgentConfig, ConfigError, ENV_PREFIX};
pub use keys::{is_env_key_char, validate_env_key, validate_env_value};
pub use topics::{event_from_channel, node_name, operation_name, subscription_pattern};
pub use types::*;

//! Typed error enums for env-file and shell operations.
//!
//! The `Display` text of each variant is exactly what the caller receives
//! in the `error` field of a reply.

use thiserror::Error;

// ── Env-file errors ───────────────────────────────────────────────────────────

/// Errors raised by [`crate::store::ConfigStore`] operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Error .env doesn't exist")]
    Missing,

    #[error("Key {0} already exists in .env")]
    KeyExists(String),

    #[error("Key {0} doesn't exist in .env")]
    KeyMissing(String),

    #[error("Invalid key '{key}': {reason}")]
    InvalidKey { key: String, reason: &'static str },

    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: &'static str },

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

// ── Shell errors ──────────────────────────────────────────────────────────────

/// Errors raised before or while running an `execute` command.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("execute is disabled on this node")]
    Disabled,

    #[error("command is empty")]
    Empty,

    #[error("'{0}' is not in the execute allowlist")]
    NotAllowed(String),

    #[error("failed to launch command: {0}")]
    Launch(#[source] std::io::Error),

    #[error("failed waiting for command: {0}")]
    Wait(#[source] std::io::Error),

    #[error("command timed out after {0}s")]
    Timeout(u64),
}

// ── Bus errors ────────────────────────────────────────────────────────────────

/// Errors decoding an inbound message or encoding its reply.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("message body is not text")]
    NotText,

    #[error("malformed envelope: {0}")]
    Envelope(#[source] serde_json::Error),

    #[error("failed to encode reply: {0}")]
    Encode(#[source] serde_json::Error),
}

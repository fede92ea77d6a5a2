use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Operations an agent will execute. Anything else is rejected.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Operation {
    #[serde(rename = "get")]
    Get,
    #[serde(rename = "getKey")]
    GetKey,
    #[serde(rename = "set")]
    Set,
    #[serde(rename = "delete")]
    Delete,
    #[serde(rename = "write")]
    Write,
    #[serde(rename = "add")]
    Add,
    #[serde(rename = "execute")]
    Execute,
}

impl Operation {
    pub const ALL: [Operation; 7] = [
        Operation::Get,
        Operation::GetKey,
        Operation::Set,
        Operation::Delete,
        Operation::Write,
        Operation::Add,
        Operation::Execute,
    ];

    /// Wire name of the operation, as it appears in `env.<name>`.
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Get => "get",
            Operation::GetKey => "getKey",
            Operation::Set => "set",
            Operation::Delete => "delete",
            Operation::Write => "write",
            Operation::Add => "add",
            Operation::Execute => "execute",
        }
    }

    /// Whether the operation rewrites or appends to the env file.
    pub fn mutates_file(self) -> bool {
        matches!(
            self,
            Operation::Set | Operation::Delete | Operation::Write | Operation::Add
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejection for a name outside the operation whitelist.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0} is not executable")]
pub struct UnknownOperation(pub String);

impl FromStr for Operation {
    type Err = UnknownOperation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| UnknownOperation(s.to_string()))
    }
}

/// A parsed env value, coerced to a boolean or number where unambiguous.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl EnvValue {
    /// Coerce a raw value from the env file.
    ///
    /// `true`/`false` (any case) become booleans. Integer literals become
    /// `Int` unless they carry a leading zero (`007` stays text) or overflow.
    /// Literals with a fraction or exponent become `Float` when finite.
    pub fn coerce(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("true") {
            return EnvValue::Bool(true);
        }
        if raw.eq_ignore_ascii_case("false") {
            return EnvValue::Bool(false);
        }
        let digits = raw.strip_prefix('-').unwrap_or(raw);
        if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
            if digits.len() > 1 && digits.starts_with('0') {
                return EnvValue::Text(raw.to_string());
            }
            return raw
                .parse()
                .map_or_else(|_| EnvValue::Text(raw.to_string()), EnvValue::Int);
        }
        let numeric_shape = !digits.is_empty()
            && digits.bytes().next().is_some_and(|b| b.is_ascii_digit() || b == b'.')
            && digits
                .bytes()
                .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'e' | b'E' | b'-' | b'+'));
        if numeric_shape {
            if let Ok(value) = raw.parse::<f64>() {
                if value.is_finite() {
                    return EnvValue::Float(value);
                }
            }
        }
        EnvValue::Text(raw.to_string())
    }
}

impl fmt::Display for EnvValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvValue::Bool(b) => write!(f, "{b}"),
            EnvValue::Int(i) => write!(f, "{i}"),
            EnvValue::Float(x) => write!(f, "{x}"),
            EnvValue::Text(s) => f.write_str(s),
        }
    }
}

/// Cached view of the env file: key to coerced value.
pub type ParsedEnv = BTreeMap<String, EnvValue>;

/// Either a success message or an error message, never both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    #[serde(rename = "msg")]
    Msg(String),
    #[serde(rename = "error")]
    Error(String),
}

impl Outcome {
    pub fn is_error(&self) -> bool {
        matches!(self, Outcome::Error(_))
    }
}

/// `{hostname, msg}` / `{hostname, error}`. `hostname` is omitted for the
/// operations that answer without it (`write`, `getKey` failures, and
/// unknown operations).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(flatten)]
    pub outcome: Outcome,
}

/// Per-node entry of a `get` reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub env: ParsedEnv,
    #[serde(rename = "type")]
    pub node_type: String,
}

/// Everything an agent can answer to one event.
///
/// Variant order matters for deserialization: `Missing` must be tried
/// before `Node`, which would otherwise swallow its `error` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reply {
    /// `get` when the env file is gone.
    Missing { error: String, exists: bool },
    Node(NodeResponse),
    /// `get`: `{<node_name>: {env, type}}`.
    Snapshot(BTreeMap<String, NodeSnapshot>),
    /// `getKey`: the bare value.
    Value(EnvValue),
}

impl Reply {
    pub fn msg(hostname: impl Into<String>, msg: impl Into<String>) -> Self {
        Reply::Node(NodeResponse {
            hostname: Some(hostname.into()),
            outcome: Outcome::Msg(msg.into()),
        })
    }

    pub fn error(hostname: impl Into<String>, error: impl Into<String>) -> Self {
        Reply::Node(NodeResponse {
            hostname: Some(hostname.into()),
            outcome: Outcome::Error(error.into()),
        })
    }

    pub fn bare_msg(msg: impl Into<String>) -> Self {
        Reply::Node(NodeResponse {
            hostname: None,
            outcome: Outcome::Msg(msg.into()),
        })
    }

    pub fn bare_error(error: impl Into<String>) -> Self {
        Reply::Node(NodeResponse {
            hostname: None,
            outcome: Outcome::Error(error.into()),
        })
    }

    pub fn is_error(&self) -> bool {
        match self {
            Reply::Missing { .. } => true,
            Reply::Node(resp) => resp.outcome.is_error(),
            Reply::Snapshot(_) | Reply::Value(_) => false,
        }
    }

    /// Error text, if this reply reports a failure.
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Reply::Missing { error, .. } => Some(error),
            Reply::Node(NodeResponse {
                outcome: Outcome::Error(error),
                ..
            }) => Some(error),
            _ => None,
        }
    }
}

// ===================================================================
// Operation payloads
// ===================================================================

/// Payload of `getKey` and `delete`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyInput {
    pub key: String,
}

/// Payload of `set` and `add`. `value` may be any JSON scalar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyValueInput {
    pub key: String,
    pub value: EnvValue,
}

/// Payload of `write`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteInput {
    pub data: String,
}

/// Payload of `execute`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteInput {
    pub cmd: String,
}

// ===================================================================
// Bus envelopes
// ===================================================================

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// Request body published on `<prefix>:<node>:env.<operation>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Correlation id echoed back in the reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Channel the reply is published to. Without it the reply is only logged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(default = "empty_object")]
    pub data: serde_json::Value,
}

/// Transport metadata handed to the dispatcher with each payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    /// Event name, `env.<operation>`.
    pub event: String,
    pub channel: String,
    pub id: Option<String>,
    pub reply_to: Option<String>,
}

/// Reply body published on the caller's `reply_to` channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub hostname: String,
    pub at: DateTime<Utc>,
    pub result: Reply,
}

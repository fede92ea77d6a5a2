//! Maps inbound events to the fixed operation whitelist and shapes replies.
//!
//! Resolution is an explicit `match` over [`Operation`]; there is no lookup
//! by name into arbitrary methods, so nothing beyond the seven operations
//! is reachable from the bus.

use std::collections::BTreeMap;

use environ_common::{
    ExecuteInput, KeyInput, KeyValueInput, Metadata, NodeResponse, NodeSnapshot, Operation, Reply,
    WriteInput, operation_name,
};
use serde::de::DeserializeOwned;

use crate::error::StoreError;
use crate::exec::{CommandRunner, Shell, ShellRunner};
use crate::fs::{FileSystem, TokioFs};
use crate::store::ConfigStore;

/// Who is answering: stamped into replies so a fan-out caller can tell
/// agents apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    pub hostname: String,
    pub node_name: String,
    pub node_type: String,
}

/// Routes one event to one operation and produces exactly one reply.
#[derive(Debug)]
pub struct Dispatcher<F = TokioFs, R = ShellRunner> {
    store: ConfigStore<F>,
    shell: Shell<R>,
    node: NodeIdentity,
}

fn decode<T: DeserializeOwned>(op: Operation, payload: serde_json::Value) -> Result<T, String> {
    serde_json::from_value(payload).map_err(|e| format!("invalid payload for {op}: {e}"))
}

impl<F: FileSystem, R: CommandRunner> Dispatcher<F, R> {
    pub fn new(store: ConfigStore<F>, shell: Shell<R>, node: NodeIdentity) -> Self {
        Self { store, shell, node }
    }

    pub fn node(&self) -> &NodeIdentity {
        &self.node
    }

    pub fn store(&self) -> &ConfigStore<F> {
        &self.store
    }

    /// Transport entry point: route the event named in `meta` and hand the
    /// reply to `respond`, exactly once.
    pub async fn handle<C>(&self, payload: serde_json::Value, meta: &Metadata, respond: C)
    where
        C: FnOnce(Reply),
    {
        let reply = self.route(&meta.event, payload).await;
        respond(reply);
    }

    /// Resolve `event` (`env.<operation>`) and run the operation.
    pub async fn route(&self, event: &str, payload: serde_json::Value) -> Reply {
        let name = operation_name(event);
        let op = match name.parse::<Operation>() {
            Ok(op) => op,
            Err(e) => {
                tracing::warn!(event, "rejected operation outside whitelist");
                return Reply::bare_error(e.to_string());
            }
        };
        tracing::debug!(%op, "dispatching");
        self.invoke(op, payload).await
    }

    async fn invoke(&self, op: Operation, payload: serde_json::Value) -> Reply {
        match op {
            Operation::Get => self.get().await,
            Operation::GetKey => match decode::<KeyInput>(op, payload) {
                Ok(input) => self.get_key(&input.key).await,
                Err(e) => Reply::bare_error(e),
            },
            Operation::Set => match decode::<KeyValueInput>(op, payload) {
                Ok(input) => self.set(&input.key, &input.value.to_string()).await,
                Err(e) => self.failure(e),
            },
            Operation::Add => match decode::<KeyValueInput>(op, payload) {
                Ok(input) => self.add(&input.key, &input.value.to_string()).await,
                Err(e) => self.failure(e),
            },
            Operation::Delete => match decode::<KeyInput>(op, payload) {
                Ok(input) => self.delete(&input.key).await,
                Err(e) => self.failure(e),
            },
            Operation::Write => match decode::<WriteInput>(op, payload) {
                Ok(input) => self.write(&input.data).await,
                Err(e) => Reply::bare_error(e),
            },
            Operation::Execute => match decode::<ExecuteInput>(op, payload) {
                Ok(input) => self.execute(&input.cmd).await,
                Err(e) => self.failure(e),
            },
        }
    }

    fn success(&self, msg: String) -> Reply {
        Reply::msg(&self.node.hostname, msg)
    }

    fn failure(&self, error: impl ToString) -> Reply {
        let error = error.to_string();
        tracing::warn!(%error, "operation failed");
        Reply::error(&self.node.hostname, error)
    }

    // ── Operations ────────────────────────────────────────────────────────────

    /// `{<node_name>: {env, type}}` from the cache, or `{error, exists}`
    /// once the file is gone.
    pub async fn get(&self) -> Reply {
        if !self.store.exists().await {
            return Reply::Missing {
                error: StoreError::Missing.to_string(),
                exists: false,
            };
        }
        let snapshot = NodeSnapshot {
            env: self.store.snapshot().await,
            node_type: self.node.node_type.clone(),
        };
        Reply::Snapshot(BTreeMap::from([(self.node.node_name.clone(), snapshot)]))
    }

    /// Bare cached value of `key`, or `{error}`.
    pub async fn get_key(&self, key: &str) -> Reply {
        match self.store.value(key).await {
            Some(value) => Reply::Value(value),
            None => Reply::bare_error(StoreError::KeyMissing(key.to_string()).to_string()),
        }
    }

    pub async fn set(&self, key: &str, value: &str) -> Reply {
        match self.store.set(key, value).await {
            Ok(_) => self.success(format!(
                "Successfully updated key: {key}, with value: {value}"
            )),
            Err(e) => self.failure(e),
        }
    }

    pub async fn add(&self, key: &str, value: &str) -> Reply {
        match self.store.add(key, value).await {
            Ok(()) => self.success(format!("Successfully added key: {key}={value}")),
            Err(e) => self.failure(e),
        }
    }

    pub async fn delete(&self, key: &str) -> Reply {
        match self.store.delete(key).await {
            Ok(_) => self.success(format!("Successfully deleted key: {key}")),
            Err(e) => self.failure(e),
        }
    }

    /// Full replace. Answers without `hostname`.
    pub async fn write(&self, data: &str) -> Reply {
        match self.store.write(data).await {
            Ok(()) => Reply::bare_msg("Successfully updated .env file!"),
            Err(e) => {
                tracing::warn!(error = %e, "env file replace failed");
                Reply::bare_error(e.to_string())
            }
        }
    }

    pub async fn execute(&self, cmd: &str) -> Reply {
        Reply::Node(NodeResponse {
            hostname: Some(self.node.hostname.clone()),
            outcome: self.shell.execute(cmd).await,
        })
    }
}

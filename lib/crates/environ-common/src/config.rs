use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

use crate::topics;

/// Prefix of every environment variable read into [`AgentConfig`].
pub const ENV_PREFIX: &str = "ENVIRON_";

/// Agent configuration, loaded with `envy::prefixed(ENV_PREFIX)`.
///
/// Each field maps to `ENVIRON_<FIELD>`:
///   - `ENVIRON_MASTER_NAME`          (required)
///   - `ENVIRON_MINION_ENV`           (required, path of the managed env file)
///   - `ENVIRON_MINION_TYPE`          (default empty)
///   - `ENVIRON_CORTEX_PREFIX`        (default `none`)
///   - `ENVIRON_CORTEX_REDIS`         (default `redis://127.0.0.1:6222`)
///   - `ENVIRON_VALKEY_USER`          (optional ACL user)
///   - `ENVIRON_VALKEY_PASS_FILE`     (optional, path to the ACL password)
///   - `ENVIRON_TLS_CA`               (optional, enables TLS)
///   - `ENVIRON_TLS_CERT` / `_KEY`    (optional, enables mTLS)
///   - `ENVIRON_HEALTH_ADDR`          (optional, serves `GET /health`)
///   - `ENVIRON_EXEC_ENABLED`         (default `true`)
///   - `ENVIRON_EXEC_ALLOWLIST`       (optional, comma-separated programs)
///   - `ENVIRON_EXEC_MAX_CONCURRENT`  (default `4`)
///   - `ENVIRON_EXEC_TIMEOUT_SECS`    (optional)
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Name of the controlling master; the node name is derived from it.
    pub master_name: String,

    /// Path of the env file this agent manages. Must exist at startup.
    pub minion_env: PathBuf,

    /// Declared node type, echoed in `get` replies.
    #[serde(default)]
    pub minion_type: String,

    /// Channel prefix shared with the control plane.
    #[serde(default = "default_cortex_prefix")]
    pub cortex_prefix: String,

    /// Valkey (Redis-compatible) connection URL.
    #[serde(default = "default_cortex_redis")]
    pub cortex_redis: String,

    /// ACL username for Valkey authentication.
    pub valkey_user: Option<String>,

    /// Path to a file containing the ACL password (Docker secret).
    pub valkey_pass_file: Option<PathBuf>,

    /// CA certificate used to verify the Valkey server.
    pub tls_ca: Option<PathBuf>,

    /// Client certificate for mTLS.
    pub tls_cert: Option<PathBuf>,

    /// Client private key for mTLS.
    pub tls_key: Option<PathBuf>,

    /// Address of the optional health-check listener.
    pub health_addr: Option<SocketAddr>,

    /// Whether `execute` runs commands at all.
    #[serde(default = "default_exec_enabled")]
    pub exec_enabled: bool,

    /// Programs `execute` may start. Unset means unrestricted.
    pub exec_allowlist: Option<Vec<String>>,

    /// Upper bound on concurrently running subprocesses.
    #[serde(default = "default_exec_max_concurrent")]
    pub exec_max_concurrent: usize,

    /// Kill subprocesses still running after this many seconds.
    pub exec_timeout_secs: Option<u64>,
}

/// Configuration rejected by [`AgentConfig::validate`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("ENVIRON_MASTER_NAME must not be empty")]
    EmptyMasterName,

    #[error("ENVIRON_MINION_ENV must not be empty")]
    EmptyEnvPath,

    #[error("ENVIRON_EXEC_MAX_CONCURRENT must be at least 1")]
    ZeroConcurrency,

    #[error("ENVIRON_TLS_CERT and ENVIRON_TLS_KEY must be set together")]
    PartialClientAuth,
}

fn default_cortex_prefix() -> String {
    "none".to_string()
}

fn default_cortex_redis() -> String {
    "redis://127.0.0.1:6222".to_string()
}

fn default_exec_enabled() -> bool {
    true
}

fn default_exec_max_concurrent() -> usize {
    4
}

impl AgentConfig {
    /// Configuration with every optional setting at its default.
    pub fn new(master_name: impl Into<String>, minion_env: impl Into<PathBuf>) -> Self {
        Self {
            master_name: master_name.into(),
            minion_env: minion_env.into(),
            minion_type: String::new(),
            cortex_prefix: default_cortex_prefix(),
            cortex_redis: default_cortex_redis(),
            valkey_user: None,
            valkey_pass_file: None,
            tls_ca: None,
            tls_cert: None,
            tls_key: None,
            health_addr: None,
            exec_enabled: default_exec_enabled(),
            exec_allowlist: None,
            exec_max_concurrent: default_exec_max_concurrent(),
            exec_timeout_secs: None,
        }
    }

    /// Node name shared by every agent of this master.
    pub fn node_name(&self) -> String {
        topics::node_name(&self.master_name)
    }

    /// Pattern this agent subscribes to.
    pub fn subscription_pattern(&self) -> String {
        topics::subscription_pattern(&self.cortex_prefix, &self.node_name())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.master_name.trim().is_empty() {
            return Err(ConfigError::EmptyMasterName);
        }
        if self.minion_env.as_os_str().is_empty() {
            return Err(ConfigError::EmptyEnvPath);
        }
        if self.exec_max_concurrent == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.tls_cert.is_some() != self.tls_key.is_some() {
            return Err(ConfigError::PartialClientAuth);
        }
        Ok(())
    }
}

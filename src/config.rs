//! Per-node configuration.
//!
//! Small `env_parse_or`/`env_bool` helpers plus one `thiserror` enum for the
//! failure modes. CLI flag parsing is out of scope here — configuration is
//! env-var only.

use std::env;
use std::time::Duration;

use thiserror::Error;

/// Configuration errors with descriptive messages. Surfaced at startup;
/// the process aborts rather than running with an invalid configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },
}

fn env_parse_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(val) => val.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            var: name.into(),
            message: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .to_lowercase()
        == "true"
}

/// Per-node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Directory holding this node's persistent Raft state.
    pub data_dir: String,
    /// HTTP bind address for [`crate::http`]'s get/set/join/list surface.
    pub http_addr: String,
    /// Raft transport bind address — also this node's stable identity.
    pub raft_addr: String,
    /// Whether this node starts a new cluster.
    pub bootstrap: bool,
    /// Peer to request to join, if any.
    pub join_addr: Option<String>,
    /// Bounds `ConsensusNode::propose`.
    pub propose_timeout: Duration,
    /// Wall-clock period between snapshot attempts.
    pub snapshot_interval: Duration,
    /// Minimum committed entries since the last snapshot before a new one
    /// is taken.
    pub snapshot_threshold: u64,
    /// Entries retained after a snapshot, for fast follower catch-up.
    pub trailing_logs: u64,
}

impl NodeConfig {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let data_dir = env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string());
        let http_addr = env::var("HTTP_ADDR").unwrap_or_else(|_| "127.0.0.1:6000".to_string());
        let raft_addr = env::var("RAFT_ADDR").unwrap_or_else(|_| "127.0.0.1:7000".to_string());
        let bootstrap = env_bool("BOOTSTRAP", false);
        let join_addr = env::var("JOIN_ADDR").ok().filter(|s| !s.is_empty());

        let propose_timeout_ms: u64 = env_parse_or("PROPOSE_TIMEOUT_MS", 5_000)?;
        let snapshot_interval_secs: u64 = env_parse_or("SNAPSHOT_INTERVAL_SECS", 10)?;
        let snapshot_threshold: u64 = env_parse_or("SNAPSHOT_THRESHOLD", 128)?;
        let trailing_logs: u64 = env_parse_or("TRAILING_LOGS", 64)?;

        if bootstrap && join_addr.is_some() {
            return Err(ConfigError::InvalidValue {
                var: "BOOTSTRAP / JOIN_ADDR".into(),
                message: "a node cannot both bootstrap and join".into(),
            });
        }

        Ok(Self {
            data_dir,
            http_addr,
            raft_addr,
            bootstrap,
            join_addr,
            propose_timeout: Duration::from_millis(propose_timeout_ms),
            snapshot_interval: Duration::from_secs(snapshot_interval_secs),
            snapshot_threshold,
            trailing_logs,
        })
    }

    /// Configuration for testing purposes: plain-start, no peers.
    #[cfg(test)]
    pub fn for_testing() -> Self {
        Self {
            data_dir: "./data".to_string(),
            http_addr: "127.0.0.1:6000".to_string(),
            raft_addr: "127.0.0.1:7000".to_string(),
            bootstrap: false,
            join_addr: None,
            propose_timeout: Duration::from_secs(5),
            snapshot_interval: Duration::from_secs(10),
            snapshot_threshold: 128,
            trailing_logs: 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-global; serialise tests that touch them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for var in [
            "DATA_DIR",
            "HTTP_ADDR",
            "RAFT_ADDR",
            "BOOTSTRAP",
            "JOIN_ADDR",
            "PROPOSE_TIMEOUT_MS",
            "SNAPSHOT_INTERVAL_SECS",
            "SNAPSHOT_THRESHOLD",
            "TRAILING_LOGS",
        ] {
            env::remove_var(var);
        }
    }

    #[test]
    fn defaults_are_sane() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();
        let cfg = NodeConfig::from_env().unwrap();
        assert_eq!(cfg.http_addr, "127.0.0.1:6000");
        assert_eq!(cfg.raft_addr, "127.0.0.1:7000");
        assert!(!cfg.bootstrap);
        assert!(cfg.join_addr.is_none());
        clear_env();
    }

    #[test]
    fn rejects_bootstrap_and_join_together() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();
        env::set_var("BOOTSTRAP", "true");
        env::set_var("JOIN_ADDR", "127.0.0.1:6001");
        let result = NodeConfig::from_env();
        clear_env();
        assert!(result.is_err());
    }

    #[test]
    fn invalid_numeric_value_is_an_error() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();
        env::set_var("PROPOSE_TIMEOUT_MS", "not-a-number");
        let result = NodeConfig::from_env();
        clear_env();
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn empty_join_addr_is_treated_as_absent() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();
        env::set_var("JOIN_ADDR", "");
        let cfg = NodeConfig::from_env().unwrap();
        clear_env();
        assert!(cfg.join_addr.is_none());
    }
}

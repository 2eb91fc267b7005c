//! Configuration for the row stores and the hierarchy service
//!
//! Both structs deserialize with `serde`, carry sensible defaults and can be
//! overridden from the environment:
//!
//! - `PATHTREE_LOCK_TIMEOUT_MS`: how long a transaction waits for a row lock
//! - `PATHTREE_DELETE_POLICY`: `restrict` (default) or `cascade`
//! - `PATHTREE_MAX_DEPTH`: maximum number of path segments accepted on save

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Upper bound for any lock wait, to keep misconfiguration from hanging callers
const MAX_LOCK_TIMEOUT_MS: u64 = 10 * 60 * 1000;

/// Storage backend settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Maximum wait for a row lock before `LockTimeout`
    pub lock_timeout_ms: u64,

    /// SQLite busy timeout for libsql connections
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 5000,
            busy_timeout_ms: 5000,
        }
    }
}

impl StoreConfig {
    /// Defaults overridden by `PATHTREE_LOCK_TIMEOUT_MS` when set
    ///
    /// The same value is used for the SQLite busy timeout, since both bound
    /// the wait for a conflicting writer.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(ms) = env::var("PATHTREE_LOCK_TIMEOUT_MS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
        {
            config.lock_timeout_ms = ms;
            config.busy_timeout_ms = ms;
        }
        config
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.lock_timeout_ms == 0 {
            return Err("lock_timeout_ms must be greater than 0".to_string());
        }

        if self.lock_timeout_ms > MAX_LOCK_TIMEOUT_MS {
            return Err(format!(
                "lock_timeout_ms cannot exceed {}",
                MAX_LOCK_TIMEOUT_MS
            ));
        }

        if self.busy_timeout_ms > MAX_LOCK_TIMEOUT_MS {
            return Err(format!(
                "busy_timeout_ms cannot exceed {}",
                MAX_LOCK_TIMEOUT_MS
            ));
        }

        Ok(())
    }
}

/// What `delete` does with a node that still has descendants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletePolicy {
    /// Refuse to delete a node with descendants
    #[default]
    Restrict,
    /// Delete the node together with its whole subtree
    Cascade,
}

impl std::str::FromStr for DeletePolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "restrict" => Ok(DeletePolicy::Restrict),
            "cascade" => Ok(DeletePolicy::Cascade),
            other => Err(format!("unknown delete policy '{}'", other)),
        }
    }
}

/// Hierarchy service settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    pub delete_policy: DeletePolicy,

    /// Maximum number of segments in a saved path
    pub max_depth: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            delete_policy: DeletePolicy::Restrict,
            max_depth: 32,
        }
    }
}

impl TreeConfig {
    /// Defaults overridden by `PATHTREE_DELETE_POLICY` and `PATHTREE_MAX_DEPTH`
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(policy) = env::var("PATHTREE_DELETE_POLICY") {
            match policy.parse() {
                Ok(policy) => config.delete_policy = policy,
                Err(e) => tracing::warn!("Ignoring PATHTREE_DELETE_POLICY: {}", e),
            }
        }

        if let Some(depth) = env::var("PATHTREE_MAX_DEPTH")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
        {
            config.max_depth = depth;
        }

        config
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_depth == 0 {
            return Err("max_depth must be greater than 0".to_string());
        }
        Ok(())
    }
}

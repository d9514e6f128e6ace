#![forbid(unsafe_code)]

use serde::Deserialize;
use std::path::PathBuf;

const DEFAULT_RETRY_SECONDS: i64 = 60;

#[derive(Clone, Debug, Deserialize)]
pub struct ClientConfig {
    pub databases: Vec<DatabaseConfig>,
    /// Table-name prefix applied inside every shard; `[a-z0-9_]` only.
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub verbose: bool,
    /// Cap on the shard backoff window in seconds.
    #[serde(default = "default_retry_seconds")]
    pub retry_seconds: i64,
    #[serde(default)]
    pub fault_injection: FaultInjection,
}

fn default_retry_seconds() -> i64 {
    DEFAULT_RETRY_SECONDS
}

#[derive(Clone, Debug, Deserialize)]
pub struct DatabaseConfig {
    pub id: String,
    pub path: PathBuf,
    /// Relative share of the insert draw; must be > 0.
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

impl DatabaseConfig {
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            weight: 1,
        }
    }
}

/// Test-only fault points, injected through configuration rather than any
/// process-global switch.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct FaultInjection {
    #[serde(default)]
    pub replace_with: Option<ReplaceWithFault>,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReplaceWithFault {
    RollbackAfterInsert,
}

//! Queue configuration.
//!
//! Every field has a default; a JSON document only needs to name the
//! options it overrides:
//!
//! ```json
//! { "queue_dir": "/var/spool/orders", "inmemory_object_limit": 500, "reload_interval": 2.5 }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ConfigError;

pub const DEFAULT_INMEMORY_OBJECT_LIMIT: usize = 100;
pub const DEFAULT_RELOAD_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_QUEUE_DIR_NAME: &str = "reliable_queue";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueConfig {
    /// Root directory. Holds the active partition and the `waiting/` and
    /// `retry/` sub-directories.
    pub queue_dir: PathBuf,

    /// Maximum number of items held in memory.
    pub inmemory_object_limit: usize,

    /// Period of the background reload, in seconds when serialized.
    #[serde(
        serialize_with = "serialize_secs",
        deserialize_with = "deserialize_secs"
    )]
    pub reload_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_dir: std::env::temp_dir().join(DEFAULT_QUEUE_DIR_NAME),
            inmemory_object_limit: DEFAULT_INMEMORY_OBJECT_LIMIT,
            reload_interval: DEFAULT_RELOAD_INTERVAL,
        }
    }
}

impl QueueConfig {
    pub fn new(queue_dir: impl Into<PathBuf>) -> Self {
        Self {
            queue_dir: queue_dir.into(),
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid {
                field: "queue_dir",
                reason: "must not be empty".to_string(),
            });
        }
        // 0 だと何も buffer に載らず pop が永久に待つ
        if self.inmemory_object_limit == 0 {
            return Err(ConfigError::Invalid {
                field: "inmemory_object_limit",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.reload_interval.is_zero() {
            return Err(ConfigError::Invalid {
                field: "reload_interval",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

fn serialize_secs<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(value.as_secs_f64())
}

fn deserialize_secs<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let secs = f64::deserialize(deserializer)?;
    Duration::try_from_secs_f64(secs).map_err(|_| {
        serde::de::Error::custom(format!(
            "reload_interval must be a finite, non-negative number of seconds, got {secs}"
        ))
    })
}

//! Settings for the pipeline core, loadable from a TOML file.
//!
//! This covers the core's own tunables only; parsing of external pipeline
//! definitions (step graphs in JSON) belongs to the embedding application.

use crate::error::{Result, VoxflowError};
use crate::queue::{OverflowPolicy, Priority, QueueConfig};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Queue tunables as they appear in the settings file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueSettings {
    /// Worker poll interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Grace window granted to the in-flight handler on stop, milliseconds.
    pub stop_grace_ms: u64,
    /// Maximum buffered items per queue; 0 means unbounded.
    pub capacity: usize,
    /// Overflow policy for bounded queues.
    pub overflow: OverflowPolicy,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            stop_grace_ms: 100,
            capacity: 0,
            overflow: OverflowPolicy::default(),
        }
    }
}

impl QueueSettings {
    /// Converts to the runtime queue config at a given priority.
    pub fn to_queue_config(&self, priority: Priority) -> QueueConfig {
        QueueConfig {
            priority,
            capacity: (self.capacity > 0).then_some(self.capacity),
            overflow: self.overflow,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            stop_grace: Duration::from_millis(self.stop_grace_ms),
        }
    }
}

/// Session registry tunables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionSettings {
    /// Maximum simultaneous sessions.
    pub max_sessions: usize,
    /// Idle lifetime in seconds before eviction.
    pub ttl_secs: u64,
    /// Sweeper interval in seconds.
    pub sweep_interval_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_sessions: 256,
            ttl_secs: 300,
            sweep_interval_secs: 30,
        }
    }
}

impl SessionSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Top-level settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub queue: QueueSettings,
    pub session: SessionSettings,
}

impl Settings {
    /// Loads settings from a TOML file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(VoxflowError::ConfigFileNotFound {
                path: path.display().to_string(),
            });
        }
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parses settings from a TOML string.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(contents)?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.queue.poll_interval_ms == 0 {
            return Err(VoxflowError::ConfigInvalidValue {
                key: "queue.poll_interval_ms".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.session.max_sessions == 0 {
            return Err(VoxflowError::ConfigInvalidValue {
                key: "session.max_sessions".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

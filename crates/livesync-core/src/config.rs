//! Engine configuration
//!
//! Configuration is assembled from:
//! 1. Default values
//! 2. A TOML fragment supplied by the embedding application
//! 3. Environment variables (LIVESYNC_* prefix)
//!
//! Environment variables take precedence over TOML values.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Environment variable prefix
const ENV_PREFIX: &str = "LIVESYNC";

/// Default buffer size of the notification channel
const DEFAULT_EVENT_CAPACITY: usize = 64;

/// How server-assigned timestamps that are not yet committed are materialized
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerTimestamps {
    /// Use a local estimate of the pending timestamp
    #[default]
    Estimate,
    /// Use the previously committed value
    Previous,
    /// Report pending timestamps as null
    None,
}

impl ServerTimestamps {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "estimate" => Some(ServerTimestamps::Estimate),
            "previous" => Some(ServerTimestamps::Previous),
            "none" => Some(ServerTimestamps::None),
            _ => None,
        }
    }
}

/// Options forwarded to the remote client on every read and subscription
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadOptions {
    pub server_timestamps: ServerTimestamps,
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Label used to identify the engine in log output
    #[serde(default)]
    pub label: Option<String>,

    /// Server timestamp materialization
    #[serde(default)]
    pub server_timestamps: ServerTimestamps,

    /// Buffered notifications per subscriber before lagging
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            label: None,
            server_timestamps: ServerTimestamps::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl EngineConfig {
    /// Load configuration from defaults and environment
    pub fn load() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration from a TOML string
    ///
    /// Environment variables are still applied as overrides.
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: EngineConfig =
            toml::from_str(toml_content).context("Failed to parse engine config TOML")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Set the log label
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Options passed to remote reads
    pub fn read_options(&self) -> ReadOptions {
        ReadOptions {
            server_timestamps: self.server_timestamps,
        }
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // LIVESYNC_LABEL
        if let Ok(val) = std::env::var(format!("{}_LABEL", ENV_PREFIX)) {
            self.label = if val.is_empty() { None } else { Some(val) };
        }

        // LIVESYNC_SERVER_TIMESTAMPS
        if let Ok(val) = std::env::var(format!("{}_SERVER_TIMESTAMPS", ENV_PREFIX)) {
            match ServerTimestamps::parse(&val) {
                Some(mode) => self.server_timestamps = mode,
                None => tracing::warn!("Ignoring unknown server timestamp mode: {}", val),
            }
        }

        // LIVESYNC_EVENT_CAPACITY
        if let Ok(val) = std::env::var(format!("{}_EVENT_CAPACITY", ENV_PREFIX)) {
            match val.parse::<usize>() {
                Ok(capacity) if capacity > 0 => self.event_capacity = capacity,
                _ => tracing::warn!("Ignoring invalid event capacity: {}", val),
            }
        }
    }
}

fn default_event_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}

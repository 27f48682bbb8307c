//! Bridge configuration schema.
//!
//! Loaded from a single YAML file; every section and field has a default so a
//! partial file (or an empty one) is valid.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::arena::ArenaSpec;

/// Configuration loading errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Agent connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Encounter selection and stepping.
    #[serde(default)]
    pub training: TrainingConfig,
    /// Episode reset timing (simulation seconds).
    #[serde(default)]
    pub reset: ResetConfig,
    /// Diagnostics and NDJSON event output.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Additional data-driven encounters, selectable by `key`.
    #[serde(default)]
    pub encounters: Vec<ArenaSpec>,
}

/// Agent connection configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Per-attempt connect timeout.
    #[serde(default = "default_connect_timeout_s")]
    pub connect_timeout_s: f64,
    /// Bound on each individual socket read.
    #[serde(default = "default_read_timeout_s")]
    pub read_timeout_s: f64,
    /// Connect attempts per call before giving up until the next call.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Backoff base; attempt `i` waits `reconnect_delay_s * 2^i`.
    #[serde(default = "default_reconnect_delay_s")]
    pub reconnect_delay_s: f64,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_connect_timeout_s() -> f64 {
    10.0
}

fn default_read_timeout_s() -> f64 {
    30.0
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_reconnect_delay_s() -> f64 {
    1.0
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            connect_timeout_s: default_connect_timeout_s(),
            read_timeout_s: default_read_timeout_s(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_delay_s: default_reconnect_delay_s(),
        }
    }
}

impl ConnectionConfig {
    pub fn connect_timeout(&self) -> Duration {
        secs(self.connect_timeout_s)
    }

    pub fn read_timeout(&self) -> Duration {
        secs(self.read_timeout_s)
    }

    pub fn reconnect_delay(&self) -> Duration {
        secs(self.reconnect_delay_s)
    }
}

/// Training / stepping configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrainingConfig {
    /// Encounter key (built-in preset or an entry of `encounters`).
    #[serde(default = "default_target_boss")]
    pub target_boss: String,
    /// Minimum simulation time between two steps.
    #[serde(default = "default_step_interval_s")]
    pub step_interval_s: f64,
    /// Inference only: no transitions are stored.
    #[serde(default)]
    pub eval_mode: bool,
    /// Whether the agent drives the hero from startup.
    #[serde(default = "default_agent_control")]
    pub agent_control: bool,
}

fn default_target_boss() -> String {
    ArenaSpec::SAVAGE_BEASTFLY.to_string()
}

fn default_step_interval_s() -> f64 {
    0.1
}

fn default_agent_control() -> bool {
    true
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            target_boss: default_target_boss(),
            step_interval_s: default_step_interval_s(),
            eval_mode: false,
            agent_control: default_agent_control(),
        }
    }
}

/// Reset sequence timing, in simulation seconds.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResetConfig {
    /// Time spent in a terminal state before the reset command is issued.
    #[serde(default = "default_settle_s")]
    pub settle_s: f64,
    /// Minimum time after the reset command before a fresh episode is accepted.
    #[serde(default = "default_min_reset_s")]
    pub min_reset_s: f64,
    /// Reissue the reset command if not confirmed within this time.
    #[serde(default = "default_reset_timeout_s")]
    pub reset_timeout_s: f64,
}

fn default_settle_s() -> f64 {
    1.0
}

fn default_min_reset_s() -> f64 {
    0.5
}

fn default_reset_timeout_s() -> f64 {
    10.0
}

impl Default for ResetConfig {
    fn default() -> Self {
        Self {
            settle_s: default_settle_s(),
            min_reset_s: default_min_reset_s(),
            reset_timeout_s: default_reset_timeout_s(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Default log level filter (overridden by `RUST_LOG`).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Optional NDJSON file for episode/client-stats events.
    #[serde(default)]
    pub events_path: Option<String>,
    /// Flush NDJSON logs every N lines (0 disables periodic flushing).
    #[serde(default = "default_flush_every_lines")]
    pub flush_every_lines: u64,
    /// Emit a client-stats event every N steps (0 disables).
    #[serde(default = "default_stats_every_steps")]
    pub stats_every_steps: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_flush_every_lines() -> u64 {
    100
}

fn default_stats_every_steps() -> u64 {
    500
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            events_path: None,
            flush_every_lines: default_flush_every_lines(),
            stats_every_steps: default_stats_every_steps(),
        }
    }
}

fn secs(s: f64) -> Duration {
    Duration::try_from_secs_f64(s.max(0.0)).unwrap_or(Duration::MAX)
}

fn check_seconds(name: &str, v: f64) -> Result<(), ConfigError> {
    if v.is_finite() && v >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "{name} must be a finite, non-negative number of seconds (got {v})"
        )))
    }
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Config = if yaml.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connection.host.trim().is_empty() {
            return Err(ConfigError::Invalid("connection.host is empty".into()));
        }
        if self.connection.max_reconnect_attempts == 0 {
            return Err(ConfigError::Invalid(
                "connection.max_reconnect_attempts must be > 0".into(),
            ));
        }
        for (name, v) in [
            ("connection.connect_timeout_s", self.connection.connect_timeout_s),
            ("connection.read_timeout_s", self.connection.read_timeout_s),
            ("connection.reconnect_delay_s", self.connection.reconnect_delay_s),
            ("training.step_interval_s", self.training.step_interval_s),
            ("reset.settle_s", self.reset.settle_s),
            ("reset.min_reset_s", self.reset.min_reset_s),
            ("reset.reset_timeout_s", self.reset.reset_timeout_s),
        ] {
            check_seconds(name, v)?;
        }
        if self.training.step_interval_s <= 0.0 {
            return Err(ConfigError::Invalid(
                "training.step_interval_s must be > 0".into(),
            ));
        }
        if self.training.target_boss.trim().is_empty() {
            return Err(ConfigError::Invalid("training.target_boss is empty".into()));
        }
        Ok(())
    }
}

//! Configuration system using Figment.
//!
//! This module provides strongly-typed configuration loading. Configuration is
//! loaded from:
//! 1. `labseq.toml` file (base configuration)
//! 2. Environment variables (prefixed with `LABSEQ_`)
//!
//! # Environment Variable Overrides
//!
//! Environment variables with the `LABSEQ_` prefix can override configuration
//! values. A double underscore separates the section from the field name, so
//! field names may themselves contain underscores:
//!
//! ```text
//! LABSEQ_APPLICATION__LOG_LEVEL=debug
//! LABSEQ_APPLICATION__OPERATOR="A. Rivera"
//! LABSEQ_SEQUENCES__SCHEDULER_INTERVAL_SECS=5
//! ```
//!
//! The operator name and application version stamped into saved sequence
//! metadata come from this struct, passed explicitly into the store at
//! construction. There are no ambient globals for either.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::AppResult;

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Application-level settings.
    pub application: ApplicationSettings,
    /// Sequence engine settings.
    pub sequences: SequenceSettings,
}

/// Application-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationSettings {
    /// Application name, used in log lines.
    #[serde(default = "default_app_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Operator name stamped into sequence metadata on save.
    #[serde(default = "default_operator")]
    pub operator: String,
}

/// Sequence engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceSettings {
    /// Directory holding one JSON file per persisted sequence.
    #[serde(default = "default_sequence_dir")]
    pub dir: PathBuf,
    /// Interval between schedule polls, in seconds.
    #[serde(default = "default_scheduler_interval")]
    pub scheduler_interval_secs: u64,
    /// Interval at which a paused executor re-checks its control flags, in
    /// milliseconds. Bounded pause/stop latency without busy-waiting.
    #[serde(default = "default_pause_poll")]
    pub pause_poll_ms: u64,
}

fn default_app_name() -> String {
    "labseq".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_operator() -> String {
    "unknown".to_string()
}

fn default_sequence_dir() -> PathBuf {
    PathBuf::from("sequences")
}

fn default_scheduler_interval() -> u64 {
    10
}

fn default_pause_poll() -> u64 {
    100
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            application: ApplicationSettings {
                name: default_app_name(),
                log_level: default_log_level(),
                operator: default_operator(),
            },
            sequences: SequenceSettings {
                dir: default_sequence_dir(),
                scheduler_interval_secs: default_scheduler_interval(),
                pause_poll_ms: default_pause_poll(),
            },
        }
    }
}

impl Settings {
    /// Load configuration from `labseq.toml` and `LABSEQ_` environment
    /// variables, falling back to defaults for anything unspecified.
    pub fn load() -> AppResult<Self> {
        Self::load_from(Path::new("labseq.toml"))
    }

    /// Load configuration from a specific TOML file path.
    ///
    /// A missing file is not an error; defaults and environment overrides
    /// still apply.
    pub fn load_from(path: &Path) -> AppResult<Self> {
        let settings = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("LABSEQ_").split("__"))
            .extract()?;
        Ok(settings)
    }

    /// Scheduler poll interval as a [`Duration`].
    pub fn scheduler_interval(&self) -> Duration {
        Duration::from_secs(self.sequences.scheduler_interval_secs)
    }

    /// Pause/stop flag poll interval as a [`Duration`].
    pub fn pause_poll(&self) -> Duration {
        Duration::from_millis(self.sequences.pause_poll_ms)
    }
}

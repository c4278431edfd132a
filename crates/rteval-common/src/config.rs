//! Configuration structures for an rteval run.
//!
//! Supports TOML deserialization with defaults matching a stock rteval
//! run (one hour, loads on every node, cyclictest on every CPU).

use crate::error::RtevalError;
use crate::params::ModuleParams;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level run configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// How long measurement runs once loads are unleashed.
    #[serde(with = "humantime_serde")]
    pub duration: Duration,

    /// Interval between "time remaining" status reports.
    #[serde(with = "humantime_serde")]
    pub report_interval: Duration,

    /// Working directory; build and report directories are created below it.
    pub workdir: PathBuf,

    /// Directory holding load source tarballs (kernel sources for kcompile).
    pub srcdir: PathBuf,

    /// Send module stdout/stderr to log files in the report directory.
    pub logging: bool,

    /// Supervision timings.
    pub timing: TimingConfig,

    /// Load modules and their placement.
    pub loads: ModuleSetConfig,

    /// Measurement modules and their placement.
    pub measurement: ModuleSetConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(60 * 60),
            report_interval: Duration::from_secs(600),
            workdir: PathBuf::from("/var/tmp/rteval"),
            srcdir: PathBuf::from("/usr/share/rteval/loadsource"),
            logging: false,
            timing: TimingConfig::default(),
            loads: ModuleSetConfig::with_modules(&["hackbench", "kcompile", "stressng"]),
            measurement: ModuleSetConfig::with_modules(&["cyclictest"]),
        }
    }
}

/// Timings used by the run loop and module drivers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Warm-up between starting and unleashing; never measured.
    #[serde(with = "humantime_serde")]
    pub settle: Duration,

    /// Supervision tick of the run loop.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Sample the load average once every this many ticks.
    pub loadavg_every: u32,

    /// Pause between two `task` invocations of a module.
    #[serde(with = "humantime_serde")]
    pub task_interval: Duration,

    /// Grace period between the polite stop signal and SIGKILL.
    #[serde(with = "humantime_serde")]
    pub stop_grace: Duration,

    /// First delay after a work unit hits out-of-memory.
    #[serde(with = "humantime_serde")]
    pub oom_initial_backoff: Duration,

    /// Upper bound of the out-of-memory backoff.
    #[serde(with = "humantime_serde")]
    pub oom_max_backoff: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            settle: Duration::from_secs(30),
            poll_interval: Duration::from_secs(60),
            loadavg_every: 5,
            task_interval: Duration::from_secs(1),
            stop_grace: Duration::from_secs(2),
            oom_initial_backoff: Duration::from_secs(5),
            oom_max_backoff: Duration::from_secs(60),
        }
    }
}

/// A set of modules sharing a CPU placement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleSetConfig {
    /// Restrict the modules to these CPUs (cpulist syntax, e.g. `"2-7,9"`).
    pub cpulist: Option<String>,

    /// Enabled modules, keyed by registry name, with their parameters.
    pub modules: BTreeMap<String, ModuleParams>,
}

impl ModuleSetConfig {
    /// Enable each named module with empty parameters.
    #[must_use]
    pub fn with_modules(names: &[&str]) -> Self {
        Self {
            cpulist: None,
            modules: names
                .iter()
                .map(|name| ((*name).to_string(), ModuleParams::new()))
                .collect(),
        }
    }
}

impl RunConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }

    /// Serialize configuration to TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Check values the run loop cannot work with.
    ///
    /// # Errors
    ///
    /// Returns a [`RtevalError::Config`] naming the offending key.
    pub fn validate(&self) -> Result<(), RtevalError> {
        if self.duration.is_zero() {
            return Err(RtevalError::config("rteval", "duration must be greater than zero"));
        }
        if self.timing.poll_interval.is_zero() {
            return Err(RtevalError::config("timing", "poll_interval must be greater than zero"));
        }
        if self.timing.loadavg_every == 0 {
            return Err(RtevalError::config("timing", "loadavg_every must be at least 1"));
        }
        if self.timing.oom_initial_backoff > self.timing.oom_max_backoff {
            return Err(RtevalError::config(
                "timing",
                "oom_initial_backoff must not exceed oom_max_backoff",
            ));
        }
        Ok(())
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Serde helper module for `Duration` using humantime format.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

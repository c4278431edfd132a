//! Module parameters and the run-wide values handed to every module setup.

use crate::error::{RtevalError, RtevalResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Declaration of an option a module recognizes.
///
/// Unknown options are still passed through to the module; the schema is
/// only used for defaults and for `--list-modules` output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSpec {
    /// Option name as it appears in the config table.
    pub name: &'static str,
    /// One-line description.
    pub description: &'static str,
    /// Default value, if the option has one.
    pub default: Option<&'static str>,
    /// Placeholder shown in usage text (e.g. `NUM`).
    pub metavar: &'static str,
}

/// Key/value parameters of a single module.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleParams(BTreeMap<String, toml::Value>);

impl ModuleParams {
    /// Create an empty parameter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, mostly useful in tests.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<toml::Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    /// Insert or replace a value.
    pub fn insert(&mut self, key: &str, value: impl Into<toml::Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    /// Fill in defaults for every declared option that is not set.
    pub fn apply_defaults(&mut self, specs: &[ParamSpec]) {
        for spec in specs {
            if let Some(default) = spec.default {
                self.0
                    .entry(spec.name.to_string())
                    .or_insert_with(|| toml::Value::String(default.to_string()));
            }
        }
    }

    /// Whether an option is present.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Option rendered as a string, regardless of its TOML type.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<String> {
        self.0.get(key).map(|value| match value {
            toml::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    /// Option parsed into `T`; a value that does not parse is a
    /// configuration error for `module`.
    pub fn get<T: FromStr>(&self, module: &str, key: &str) -> RtevalResult<Option<T>> {
        match self.get_str(key) {
            None => Ok(None),
            Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
                RtevalError::config(module, format!("invalid value {raw:?} for option '{key}'"))
            }),
        }
    }

    /// Like [`ModuleParams::get`] but falls back to `default` when unset.
    pub fn get_or<T: FromStr>(&self, module: &str, key: &str, default: T) -> RtevalResult<T> {
        Ok(self.get(module, key)?.unwrap_or(default))
    }

    /// Iterate over all options in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &toml::Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Run-wide values passed to every module's `setup`.
#[derive(Debug, Clone, PartialEq)]
pub struct SharedParams {
    /// Top-level working directory.
    pub workdir: PathBuf,
    /// Report directory of this run, if one was created.
    pub reportdir: Option<PathBuf>,
    /// Scratch directory for builds (`<workdir>/rteval-build`).
    pub builddir: PathBuf,
    /// Directory holding load source tarballs.
    pub srcdir: PathBuf,
    /// Number of online CPU cores.
    pub numcores: usize,
    /// Total system memory in bytes.
    pub memsize: u64,
    /// Number of NUMA nodes.
    pub numanodes: usize,
    /// Configured measurement duration.
    pub duration: Duration,
    /// Whether module stdout/stderr goes to log files instead of /dev/null.
    pub logging: bool,
}

impl SharedParams {
    /// Directory for module log files, when logging is enabled.
    #[must_use]
    pub fn logdir(&self) -> Option<PathBuf> {
        if self.logging {
            self.reportdir.as_ref().map(|dir| dir.join("logs"))
        } else {
            None
        }
    }

    /// Memory per core in GiB.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn gib_per_core(&self) -> f64 {
        let gib = self.memsize as f64 / (1024.0 * 1024.0 * 1024.0);
        gib / self.numcores.max(1) as f64
    }
}

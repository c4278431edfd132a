//! Supervision of the load modules.

use crate::group::ModuleGroup;
use crate::host::read_load_average;
use crate::module::{Module, ModuleReport, SetupContext};
use rteval_common::error::{RtevalError, RtevalResult};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// Owns the configured load modules for one measurement profile.
pub struct LoadModules {
    group: ModuleGroup,
    baseline: Option<usize>,
    samples: Vec<f64>,
    loadavg_path: PathBuf,
}

impl LoadModules {
    /// Manage `modules`; each driver calls `task` every `task_interval`.
    pub fn new(modules: Vec<Box<dyn Module>>, task_interval: Duration) -> Self {
        Self {
            group: ModuleGroup::new("loads", modules, task_interval),
            baseline: None,
            samples: Vec::new(),
            loadavg_path: PathBuf::from("/proc/loadavg"),
        }
    }

    /// Read load averages from another file (tests).
    #[must_use]
    pub fn with_loadavg_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.loadavg_path = path.into();
        self
    }

    /// Run `setup` on every load module.
    ///
    /// # Errors
    ///
    /// Returns the first setup error that is not module-local.
    pub fn configure(&mut self, ctx: &SetupContext<'_>) -> RtevalResult<()> {
        self.group.configure(ctx)?;
        info!(
            loaded = self.group.active_count(),
            configured = self.group.len(),
            "Load modules configured"
        );
        Ok(())
    }

    /// Build and prepare every load module; returns once all are paused
    /// and ready.
    ///
    /// # Errors
    ///
    /// Returns the first build or prepare failure.
    pub fn start(&mut self) -> RtevalResult<()> {
        info!(modules = self.group.active_count(), "Starting loads");
        self.group.start()
    }

    /// Release the loads and record the liveness baseline.
    pub fn unleash(&mut self) {
        self.group.unleash();
        let threads = self.group.live_threads();
        self.baseline = Some(threads);
        info!(threads, "Loads unleashed");
    }

    /// Compare the live thread count with the baseline.
    ///
    /// # Errors
    ///
    /// Returns [`RtevalError::LoadThreadDied`] once a load thread has ended
    /// while the run is in progress.
    pub fn check_liveness(&self) -> RtevalResult<()> {
        let Some(expected) = self.baseline else {
            return Ok(());
        };
        let alive = self.group.live_threads();
        if alive < expected {
            return Err(RtevalError::LoadThreadDied {
                expected,
                alive,
                cause: self.group.first_failure().map(|e| e.to_string()),
            });
        }
        Ok(())
    }

    /// Record the host's one-minute load average.
    pub fn sample_load_average(&mut self) {
        match read_load_average(&self.loadavg_path) {
            Ok(value) => {
                debug!(value, "Load average sampled");
                self.samples.push(value);
            }
            Err(e) => debug!(error = %e, "Load average unavailable"),
        }
    }

    /// Mean of all load average samples.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn load_average(&self) -> Option<f64> {
        if self.samples.is_empty() {
            None
        } else {
            Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
        }
    }

    /// Running work units across all loads.
    #[must_use]
    pub fn live_units(&self) -> usize {
        self.group.live_units()
    }

    /// Stop and join every load thread.
    pub fn stop(&mut self) {
        if self.baseline.take().is_some() || self.group.live_threads() > 0 {
            info!("Stopping loads");
        }
        self.group.stop();
    }

    /// Number of load modules taking part in the run.
    #[must_use]
    pub fn modules_loaded(&self) -> usize {
        self.group.active_count()
    }

    /// Reports of all load modules.
    #[must_use]
    pub fn reports(&self) -> Vec<ModuleReport> {
        self.group.reports()
    }
}

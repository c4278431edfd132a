//! A measurement profile: measurement modules sharing a load setting.

use crate::group::ModuleGroup;
use crate::module::{Module, ModuleReport, SetupContext};
use rteval_common::error::{RtevalError, RtevalResult};
use std::time::Duration;
use tracing::info;

/// Measurement modules run together, with or without loads.
pub struct MeasurementProfile {
    with_loads: bool,
    run_parallel: bool,
    group: ModuleGroup,
}

impl MeasurementProfile {
    /// Profile over `modules`.
    pub fn new(
        with_loads: bool,
        run_parallel: bool,
        modules: Vec<Box<dyn Module>>,
        task_interval: Duration,
    ) -> Self {
        Self {
            with_loads,
            run_parallel,
            group: ModuleGroup::new("measurement", modules, task_interval),
        }
    }

    /// Whether loads run alongside this profile.
    #[must_use]
    pub fn with_loads(&self) -> bool {
        self.with_loads
    }

    /// Whether the profile's modules run in parallel.
    #[must_use]
    pub fn run_parallel(&self) -> bool {
        self.run_parallel
    }

    /// Names of the profile's modules.
    #[must_use]
    pub fn module_names(&self) -> Vec<String> {
        self.group.names().map(str::to_string).collect()
    }

    /// Modules that passed setup.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.group.active_count()
    }

    /// Run `setup` on the profile's modules.
    ///
    /// # Errors
    ///
    /// Returns the first setup error that is not module-local.
    pub fn configure(&mut self, ctx: &SetupContext<'_>) -> RtevalResult<()> {
        self.group.configure(ctx)
    }

    /// Build and prepare the measurement modules, leaving them paused.
    ///
    /// # Errors
    ///
    /// Returns the first build or prepare failure.
    pub fn start(&mut self) -> RtevalResult<()> {
        info!(
            with_loads = self.with_loads,
            parallel = self.run_parallel,
            "Starting measurement profile"
        );
        self.group.start()
    }

    /// Begin sampling.
    pub fn unleash(&self) {
        self.group.unleash();
    }

    /// Whether any measurement module still takes samples.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.group.any_alive()
    }

    /// A failure recorded by a measurement module.
    #[must_use]
    pub fn failure(&self) -> Option<RtevalError> {
        self.group.first_failure()
    }

    /// Stop and join every measurement thread.
    pub fn stop(&mut self) {
        info!("Stopping measurement modules");
        self.group.stop();
    }

    /// Run each module's deferred statistics and wait for all of them.
    ///
    /// # Errors
    ///
    /// Returns the first finalize error.
    pub fn wait_for_completion(&mut self) -> RtevalResult<()> {
        self.group.finalize()
    }

    /// Reports of the profile's modules.
    #[must_use]
    pub fn reports(&self) -> Vec<ModuleReport> {
        self.group.reports()
    }
}

//! Measurement modules and their grouping into profiles.
//!
//! Parallel-capable modules with the same load setting share one profile.
//! A module that cannot run in parallel gets a profile of its own.

pub mod cyclictest;
mod profile;

pub use profile::MeasurementProfile;

use crate::module::{Module, SetupContext};
use rteval_common::error::RtevalResult;
use std::time::Duration;

/// Ordered set of measurement profiles.
pub struct MeasurementModules {
    profiles: Vec<MeasurementProfile>,
}

impl MeasurementModules {
    /// Group `modules` into profiles. Profiles with loads come first,
    /// then the ones without; module order is kept within each.
    pub fn new(modules: Vec<Box<dyn Module>>, task_interval: Duration) -> Self {
        let mut parallel_with = Vec::new();
        let mut parallel_without = Vec::new();
        let mut serial_with = Vec::new();
        let mut serial_without = Vec::new();

        for module in modules {
            match (module.run_parallel(), module.with_loads()) {
                (true, true) => parallel_with.push(module),
                (true, false) => parallel_without.push(module),
                (false, true) => serial_with.push(module),
                (false, false) => serial_without.push(module),
            }
        }

        let mut profiles = Vec::new();
        for (with_loads, parallel, serial) in [
            (true, parallel_with, serial_with),
            (false, parallel_without, serial_without),
        ] {
            if !parallel.is_empty() {
                profiles.push(MeasurementProfile::new(with_loads, true, parallel, task_interval));
            }
            for module in serial {
                profiles.push(MeasurementProfile::new(with_loads, false, vec![module], task_interval));
            }
        }

        Self { profiles }
    }

    /// Configure every profile.
    ///
    /// # Errors
    ///
    /// Returns the first setup error that is not module-local.
    pub fn configure(&mut self, ctx: &SetupContext<'_>) -> RtevalResult<()> {
        for profile in &mut self.profiles {
            profile.configure(ctx)?;
        }
        Ok(())
    }

    /// Number of profiles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    /// Whether there is no profile.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Profiles in run order.
    pub fn profiles(&self) -> impl Iterator<Item = &MeasurementProfile> {
        self.profiles.iter()
    }

    /// Mutable profiles in run order.
    pub fn profiles_mut(&mut self) -> impl Iterator<Item = &mut MeasurementProfile> {
        self.profiles.iter_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{ModuleKind, SetupOutcome, TaskContext};

    struct Probe {
        name: &'static str,
        with_loads: bool,
        parallel: bool,
    }

    impl Module for Probe {
        fn name(&self) -> &str {
            self.name
        }
        fn kind(&self) -> ModuleKind {
            ModuleKind::Measurement
        }
        fn setup(&mut self, _ctx: &SetupContext<'_>) -> RtevalResult<SetupOutcome> {
            Ok(SetupOutcome::Run)
        }
        fn task(&mut self, _ctx: &TaskContext<'_>) -> RtevalResult<()> {
            Ok(())
        }
        fn live_units(&mut self) -> usize {
            0
        }
        fn cleanup(&mut self) -> RtevalResult<()> {
            Ok(())
        }
        fn with_loads(&self) -> bool {
            self.with_loads
        }
        fn run_parallel(&self) -> bool {
            self.parallel
        }
    }

    fn probe(name: &'static str, with_loads: bool, parallel: bool) -> Box<dyn Module> {
        Box::new(Probe {
            name,
            with_loads,
            parallel,
        })
    }

    #[test]
    fn test_profile_grouping() {
        let modules = MeasurementModules::new(
            vec![
                probe("a", true, true),
                probe("idle", false, true),
                probe("solo", true, false),
                probe("b", true, true),
            ],
            Duration::from_millis(5),
        );

        let layout: Vec<(bool, bool, Vec<String>)> = modules
            .profiles()
            .map(|p| (p.with_loads(), p.run_parallel(), p.module_names()))
            .collect();
        assert_eq!(
            layout,
            vec![
                (true, true, vec!["a".to_string(), "b".to_string()]),
                (true, false, vec!["solo".to_string()]),
                (false, true, vec!["idle".to_string()]),
            ]
        );
    }

    #[test]
    fn test_no_modules_no_profiles() {
        let modules = MeasurementModules::new(Vec::new(), Duration::from_millis(5));
        assert!(modules.is_empty());
    }
}

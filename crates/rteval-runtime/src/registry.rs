//! Static table of the modules this build knows about.

use crate::loads::{hackbench, kcompile, stressng};
use crate::measurement::cyclictest;
use crate::module::{Module, ModuleKind};
use rteval_common::config::ModuleSetConfig;
use rteval_common::error::{RtevalError, RtevalResult};
use rteval_common::params::{ModuleParams, ParamSpec};

/// One registered module.
#[derive(Debug, Clone, Copy)]
pub struct ModuleEntry {
    /// Name used in configuration.
    pub name: &'static str,
    /// Load or measurement.
    pub kind: ModuleKind,
    /// Option schema.
    pub parameters: &'static [ParamSpec],
    /// Build the module from its options.
    pub constructor: fn(ModuleParams) -> Box<dyn Module>,
}

/// Registered load modules.
pub const LOAD_MODULES: &[ModuleEntry] = &[
    ModuleEntry {
        name: hackbench::NAME,
        kind: ModuleKind::Load,
        parameters: hackbench::PARAMETERS,
        constructor: hackbench::Hackbench::create,
    },
    ModuleEntry {
        name: kcompile::NAME,
        kind: ModuleKind::Load,
        parameters: kcompile::PARAMETERS,
        constructor: kcompile::Kcompile::create,
    },
    ModuleEntry {
        name: stressng::NAME,
        kind: ModuleKind::Load,
        parameters: stressng::PARAMETERS,
        constructor: stressng::Stressng::create,
    },
];

/// Registered measurement modules.
pub const MEASUREMENT_MODULES: &[ModuleEntry] = &[ModuleEntry {
    name: cyclictest::NAME,
    kind: ModuleKind::Measurement,
    parameters: cyclictest::PARAMETERS,
    constructor: cyclictest::Cyclictest::create,
}];

/// Every registered module, loads first.
pub fn entries() -> impl Iterator<Item = &'static ModuleEntry> {
    LOAD_MODULES.iter().chain(MEASUREMENT_MODULES)
}

/// Find a module by kind and name.
#[must_use]
pub fn lookup(kind: ModuleKind, name: &str) -> Option<&'static ModuleEntry> {
    let table = match kind {
        ModuleKind::Load => LOAD_MODULES,
        ModuleKind::Measurement => MEASUREMENT_MODULES,
    };
    table.iter().find(|entry| entry.name == name)
}

fn create(kind: ModuleKind, set: &ModuleSetConfig) -> RtevalResult<Vec<Box<dyn Module>>> {
    set.modules
        .iter()
        .map(|(name, params)| {
            let entry = lookup(kind, name)
                .ok_or_else(|| RtevalError::config(name.as_str(), format!("no such {kind} module")))?;
            Ok((entry.constructor)(params.clone()))
        })
        .collect()
}

/// Instantiate the configured load modules.
///
/// # Errors
///
/// Returns [`RtevalError::Config`] for a name that is not registered.
pub fn create_loads(set: &ModuleSetConfig) -> RtevalResult<Vec<Box<dyn Module>>> {
    create(ModuleKind::Load, set)
}

/// Instantiate the configured measurement modules.
///
/// # Errors
///
/// Returns [`RtevalError::Config`] for a name that is not registered.
pub fn create_measurements(set: &ModuleSetConfig) -> RtevalResult<Vec<Box<dyn Module>>> {
    create(ModuleKind::Measurement, set)
}

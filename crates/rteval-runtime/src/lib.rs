#![doc = "Module execution engine for rteval: topology, module lifecycle, load and measurement managers, and the run loop."]

pub mod backoff;
pub mod group;
pub mod host;
pub mod load_manager;
pub mod loads;
pub mod measurement;
pub mod module;
pub mod process;
pub mod registry;
pub mod run_loop;
pub mod signals;
pub mod topology;

#[cfg(test)]
mod testing;

pub use backoff::OomBackoff;
pub use host::RtCapabilities;
pub use load_manager::LoadModules;
pub use measurement::{MeasurementModules, MeasurementProfile};
pub use module::*;
pub use process::{UnitExit, WorkUnit};
pub use run_loop::*;
pub use signals::{SignalGuard, StopToken};
pub use topology::*;

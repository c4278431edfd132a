//! A set of modules driven together: configure, start behind a barrier,
//! unleash, stop, finalize.
//!
//! Both the load manager and measurement profiles are built on this.

use crate::module::{spawn_driver, Module, ModuleControl, ModuleReport, SetupContext, SetupOutcome};
use crossbeam_utils::sync::WaitGroup;
use rteval_common::error::{RtevalError, RtevalResult};
use rteval_common::state::ModuleState;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

struct Slot {
    control: Arc<ModuleControl>,
    skipped: Option<String>,
    module: Option<Box<dyn Module>>,
    handle: Option<JoinHandle<Box<dyn Module>>>,
}

impl Slot {
    fn is_active(&self) -> bool {
        self.skipped.is_none()
    }

    fn thread_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

/// Modules sharing one start barrier.
pub struct ModuleGroup {
    label: &'static str,
    slots: Vec<Slot>,
    task_interval: Duration,
}

impl ModuleGroup {
    /// Group the given modules; `label` names the group in logs.
    pub fn new(label: &'static str, modules: Vec<Box<dyn Module>>, task_interval: Duration) -> Self {
        let slots = modules
            .into_iter()
            .map(|module| Slot {
                control: Arc::new(ModuleControl::new(module.name(), module.kind())),
                skipped: None,
                module: Some(module),
                handle: None,
            })
            .collect();
        Self {
            label,
            slots,
            task_interval,
        }
    }

    /// Run `setup` on every module.
    ///
    /// Modules answering do-not-run, or failing with a configuration
    /// error, are kept for reporting but take no further part.
    ///
    /// # Errors
    ///
    /// Returns the first non-configuration setup error.
    pub fn configure(&mut self, ctx: &SetupContext<'_>) -> RtevalResult<()> {
        for slot in &mut self.slots {
            let Some(module) = slot.module.as_mut() else {
                continue;
            };
            let name = slot.control.name().to_string();
            match module.setup(ctx) {
                Ok(SetupOutcome::Run) => {
                    slot.control.advance(ModuleState::Configured)?;
                    debug!(group = self.label, module = %name, "Configured");
                }
                Ok(SetupOutcome::DoNotRun(reason)) => {
                    info!(group = self.label, module = %name, %reason, "Module will not run");
                    slot.skipped = Some(reason);
                }
                Err(e) if e.is_module_local() => {
                    warn!(group = self.label, module = %name, error = %e, "Module disabled");
                    slot.skipped = Some(e.to_string());
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Spawn a driver per active module and wait until every one of them
    /// is ready (or has failed).
    ///
    /// # Errors
    ///
    /// Returns the first build/prepare failure, or an I/O error if a
    /// thread could not be spawned.
    pub fn start(&mut self) -> RtevalResult<()> {
        let ready = WaitGroup::new();
        let mut spawn_error = None;

        for slot in self.slots.iter_mut().filter(|s| s.is_active()) {
            let Some(module) = slot.module.take() else {
                continue;
            };
            match spawn_driver(module, Arc::clone(&slot.control), ready.clone(), self.task_interval) {
                Ok(handle) => slot.handle = Some(handle),
                Err(e) => {
                    spawn_error = Some(RtevalError::io(
                        format!("spawn thread for {}", slot.control.name()),
                        &e,
                    ));
                    break;
                }
            }
        }

        ready.wait();
        if let Some(e) = spawn_error {
            return Err(e);
        }
        if let Some(e) = self.first_failure() {
            return Err(e);
        }

        info!(group = self.label, modules = self.active_count(), "All modules ready");
        Ok(())
    }

    /// Release every paused module.
    pub fn unleash(&self) {
        for slot in self.slots.iter().filter(|s| s.is_active()) {
            slot.control.unleash();
        }
    }

    /// Number of modules that passed `setup`.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_active()).count()
    }

    /// Total number of modules, including skipped ones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the group holds no modules at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Names of all modules.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.slots.iter().map(|s| s.control.name())
    }

    /// Number of driver threads still running.
    #[must_use]
    pub fn live_threads(&self) -> usize {
        self.slots.iter().filter(|s| s.thread_running()).count()
    }

    /// Whether any active module still reports live work.
    #[must_use]
    pub fn any_alive(&self) -> bool {
        self.slots
            .iter()
            .any(|s| s.thread_running() && s.control.is_alive())
    }

    /// Sum of running work units over all modules.
    #[must_use]
    pub fn live_units(&self) -> usize {
        self.slots.iter().map(|s| s.control.live_units()).sum()
    }

    /// First failure recorded by any module.
    #[must_use]
    pub fn first_failure(&self) -> Option<RtevalError> {
        self.slots.iter().find_map(|s| s.control.failure())
    }

    /// Stop every driver and join it. Safe to call more than once.
    pub fn stop(&mut self) {
        for slot in &self.slots {
            slot.control.request_stop();
        }
        for slot in &mut self.slots {
            let Some(handle) = slot.handle.take() else {
                continue;
            };
            match handle.join() {
                Ok(module) => slot.module = Some(module),
                Err(_) => {
                    error!(group = self.label, module = %slot.control.name(), "Driver thread panicked");
                    slot.control.record_failure(RtevalError::ModuleFailure {
                        module: slot.control.name().to_string(),
                        status: "driver thread panicked".into(),
                    });
                }
            }
        }
        debug!(group = self.label, "All drivers joined");
    }

    /// Run `finalize` on every module that ran, concurrently.
    ///
    /// # Errors
    ///
    /// Returns the first finalize error.
    pub fn finalize(&mut self) -> RtevalResult<()> {
        let results: Vec<RtevalResult<()>> = thread::scope(|scope| {
            let workers: Vec<_> = self
                .slots
                .iter_mut()
                .filter(|s| s.is_active() && s.control.state() == ModuleState::Finished)
                .filter_map(|s| s.module.as_mut())
                .map(|module| scope.spawn(move || module.finalize()))
                .collect();
            workers
                .into_iter()
                .map(|w| {
                    w.join().unwrap_or_else(|_| {
                        Err(RtevalError::Io("finalize thread panicked".into()))
                    })
                })
                .collect()
        });
        results.into_iter().collect()
    }

    /// Reports for every module, in configuration order.
    #[must_use]
    pub fn reports(&self) -> Vec<ModuleReport> {
        self.slots
            .iter()
            .map(|s| ModuleReport {
                name: s.control.name().to_string(),
                kind: s.control.kind(),
                ran: s.is_active(),
                skipped: s.skipped.clone(),
                state: s.control.state(),
                error: s.control.failure().map(|e| e.to_string()),
                data: s
                    .module
                    .as_ref()
                    .map_or(serde_json::Value::Null, |m| m.report()),
            })
            .collect()
    }
}

impl Drop for ModuleGroup {
    fn drop(&mut self) {
        if self.slots.iter().any(|s| s.handle.is_some()) {
            self.stop();
        }
    }
}

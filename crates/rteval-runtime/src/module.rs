//! The module contract and the per-module driver thread.
//!
//! Managers never call a module from their own thread after `setup`. Each
//! active module is moved into a driver thread which walks it through
//! build, prepare and the repeated task phase, and hands it back when the
//! thread is joined. Only [`ModuleControl`] is shared with the manager.

use crate::signals::{wait_for_stop, StopToken};
use crate::topology::{CpuList, SystemTopology};
use crossbeam_utils::sync::WaitGroup;
use rteval_common::config::TimingConfig;
use rteval_common::error::{RtevalError, RtevalResult};
use rteval_common::params::SharedParams;
use rteval_common::state::ModuleState;
use serde::Serialize;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span};

const UNLEASH_POLL: Duration = Duration::from_millis(5);

/// Whether a module generates load or takes measurements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    /// Synthetic system load.
    Load,
    /// Latency sampling.
    Measurement,
}

impl std::fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Load => f.write_str("load"),
            Self::Measurement => f.write_str("measurement"),
        }
    }
}

/// Result of a module's `setup`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupOutcome {
    /// The module takes part in the run.
    Run,
    /// The module is skipped for this run; not an error.
    DoNotRun(String),
}

/// Everything a module may consult while configuring itself.
#[derive(Debug, Clone, Copy)]
pub struct SetupContext<'a> {
    /// Run-wide parameters.
    pub shared: &'a SharedParams,
    /// Host topology.
    pub topology: &'a SystemTopology,
    /// CPU restriction of the module set, if configured.
    pub cpulist: Option<&'a CpuList>,
    /// Supervision timings (stop grace, OOM backoff).
    pub timing: &'a TimingConfig,
    /// Whether `numactl` is installed.
    pub has_numactl: bool,
}

/// Passed to every `task` invocation.
#[derive(Debug)]
pub struct TaskContext<'a> {
    /// The module's stop flag.
    pub stop: &'a StopToken,
    /// Time of this invocation.
    pub now: Instant,
}

/// Contract implemented by every load and measurement module.
///
/// Calls arrive strictly in lifecycle order. `task` must not block beyond a
/// non-blocking process poll.
pub trait Module: Send {
    /// Registry name.
    fn name(&self) -> &str;

    /// Load or measurement.
    fn kind(&self) -> ModuleKind;

    /// Validate parameters and resolve placement.
    ///
    /// A [`RtevalError::Config`] disables only this module; any other error
    /// aborts the run.
    fn setup(&mut self, ctx: &SetupContext<'_>) -> RtevalResult<SetupOutcome>;

    /// One-time preparation.
    fn build(&mut self) -> RtevalResult<()> {
        Ok(())
    }

    /// Acquire runtime resources such as log files.
    fn prepare(&mut self) -> RtevalResult<()> {
        Ok(())
    }

    /// Start, restart or supervise work units.
    fn task(&mut self, ctx: &TaskContext<'_>) -> RtevalResult<()>;

    /// Number of running work units.
    fn live_units(&mut self) -> usize;

    /// Whether the module still produces load or samples.
    fn is_alive(&mut self) -> bool {
        self.live_units() > 0
    }

    /// Terminate remaining work units and release handles.
    fn cleanup(&mut self) -> RtevalResult<()>;

    /// Deferred result computation, run after cleanup.
    fn finalize(&mut self) -> RtevalResult<()> {
        Ok(())
    }

    /// Result data for the reporting collaborator.
    fn report(&self) -> serde_json::Value {
        serde_json::Value::Null
    }

    /// Measurement modules: whether loads run alongside.
    fn with_loads(&self) -> bool {
        true
    }

    /// Measurement modules: whether this module can share a profile.
    fn run_parallel(&self) -> bool {
        true
    }
}

/// State shared between a manager and one module driver.
#[derive(Debug)]
pub struct ModuleControl {
    name: String,
    kind: ModuleKind,
    state: AtomicU8,
    unleashed: AtomicBool,
    stop: StopToken,
    alive: AtomicBool,
    units: AtomicUsize,
    failure: Mutex<Option<RtevalError>>,
}

impl ModuleControl {
    /// Control block for a freshly created module.
    pub fn new(name: impl Into<String>, kind: ModuleKind) -> Self {
        Self {
            name: name.into(),
            kind,
            state: AtomicU8::new(ModuleState::Created.as_u8()),
            unleashed: AtomicBool::new(false),
            stop: StopToken::new(),
            alive: AtomicBool::new(false),
            units: AtomicUsize::new(0),
            failure: Mutex::new(None),
        }
    }

    /// Module name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Module kind.
    #[must_use]
    pub fn kind(&self) -> ModuleKind {
        self.kind
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ModuleState {
        ModuleState::from_u8(self.state.load(Ordering::Acquire)).unwrap_or_default()
    }

    /// Move to the next lifecycle state.
    ///
    /// # Errors
    ///
    /// Returns [`RtevalError::InvalidStateTransition`] unless `target` is
    /// the immediate successor of the current state.
    pub fn advance(&self, target: ModuleState) -> RtevalResult<()> {
        let current = self.state();
        if !current.can_transition_to(target) {
            return Err(RtevalError::InvalidStateTransition {
                from: current.to_string(),
                to: target.to_string(),
            });
        }
        self.state.store(target.as_u8(), Ordering::Release);
        debug!(module = %self.name, from = %current, to = %target, "State transition");
        Ok(())
    }

    /// Release the paused task phase.
    pub fn unleash(&self) {
        self.unleashed.store(true, Ordering::Release);
    }

    /// Whether the module was unleashed.
    #[must_use]
    pub fn is_unleashed(&self) -> bool {
        self.unleashed.load(Ordering::Acquire)
    }

    /// Ask the driver to leave the task phase.
    pub fn request_stop(&self) {
        self.stop.request_stop();
    }

    /// The module's stop flag.
    #[must_use]
    pub fn stop_token(&self) -> &StopToken {
        &self.stop
    }

    /// Last liveness published by the driver.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Last running unit count published by the driver.
    #[must_use]
    pub fn live_units(&self) -> usize {
        self.units.load(Ordering::Acquire)
    }

    fn publish(&self, alive: bool, units: usize) {
        self.units.store(units, Ordering::Release);
        self.alive.store(alive, Ordering::Release);
    }

    /// Store a failure; the first one recorded wins.
    pub fn record_failure(&self, err: RtevalError) {
        let mut slot = self.failure.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    /// The recorded failure, if any.
    #[must_use]
    pub fn failure(&self) -> Option<RtevalError> {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Per-module result handed to the reporting collaborator.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleReport {
    /// Module name.
    pub name: String,
    /// Load or measurement.
    pub kind: ModuleKind,
    /// Whether the module took part in the run.
    pub ran: bool,
    /// Why the module was skipped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<String>,
    /// Lifecycle state reached.
    pub state: ModuleState,
    /// Failure recorded by the module, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Module-specific results.
    pub data: serde_json::Value,
}

/// Move `module` into its driver thread.
///
/// `ready` is dropped once the module has reached the paused task phase,
/// or failed before reaching it.
pub(crate) fn spawn_driver(
    module: Box<dyn Module>,
    control: Arc<ModuleControl>,
    ready: WaitGroup,
    task_interval: Duration,
) -> io::Result<JoinHandle<Box<dyn Module>>> {
    let thread_name = format!("rteval-{}", control.name());
    thread::Builder::new()
        .name(thread_name)
        .spawn(move || drive(module, &control, ready, task_interval))
}

fn drive(
    mut module: Box<dyn Module>,
    control: &ModuleControl,
    ready: WaitGroup,
    task_interval: Duration,
) -> Box<dyn Module> {
    let span = info_span!("module", name = %control.name());
    let _enter = span.enter();

    if let Err(e) = run_phases(module.as_mut(), control, ready, task_interval) {
        error!(error = %e, "Module failed");
        control.record_failure(e);
    }

    if control.state() == ModuleState::Running {
        let cleaned = control
            .advance(ModuleState::Cleaning)
            .and_then(|()| module.cleanup());
        if let Err(e) = cleaned {
            error!(error = %e, "Cleanup failed");
            control.record_failure(e);
        }
        control.publish(false, 0);
        if let Err(e) = control.advance(ModuleState::Finished) {
            control.record_failure(e);
        }
        debug!("Module finished");
    }

    module
}

fn run_phases(
    module: &mut dyn Module,
    control: &ModuleControl,
    ready: WaitGroup,
    task_interval: Duration,
) -> RtevalResult<()> {
    let as_build_error = |e: RtevalError| match e {
        RtevalError::ModuleBuild { .. } => e,
        other => RtevalError::ModuleBuild {
            module: control.name().to_string(),
            reason: other.to_string(),
        },
    };

    module.build().map_err(as_build_error)?;
    control.advance(ModuleState::Built)?;
    module.prepare().map_err(as_build_error)?;
    control.advance(ModuleState::Prepared)?;
    control.advance(ModuleState::Running)?;
    control.publish(true, 0);
    drop(ready);
    debug!("Ready, waiting to be unleashed");

    let stop = control.stop_token();
    while !control.is_unleashed() {
        if stop.is_stopped() {
            return Ok(());
        }
        thread::sleep(UNLEASH_POLL);
    }
    info!("Unleashed");

    while !stop.is_stopped() {
        module.task(&TaskContext {
            stop,
            now: Instant::now(),
        })?;
        let units = module.live_units();
        let alive = module.is_alive();
        control.publish(alive, units);
        if wait_for_stop(stop, task_interval) {
            break;
        }
    }

    Ok(())
}

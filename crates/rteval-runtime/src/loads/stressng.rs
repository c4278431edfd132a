//! stress-ng: a single stressor process, only run when a stressor is named.

use super::node_placement;
use crate::backoff::OomBackoff;
use crate::module::{Module, ModuleKind, SetupContext, SetupOutcome, TaskContext};
use crate::process::{Spawned, UnitExit, UnitIo, WorkUnit};
use crate::topology::CpuList;
use nix::sys::signal::Signal;
use rteval_common::error::{RtevalError, RtevalResult};
use rteval_common::params::{ModuleParams, ParamSpec};
use std::path::PathBuf;
use std::process::Command;
use std::time::{Duration, Instant};
use tracing::debug;

/// Registry name.
pub const NAME: &str = "stressng";

/// Recognized options.
pub const PARAMETERS: &[ParamSpec] = &[
    ParamSpec {
        name: "option",
        description: "stressor specific option",
        default: None,
        metavar: "OPTION",
    },
    ParamSpec {
        name: "arg",
        description: "stressor specific arg",
        default: None,
        metavar: "ARG",
    },
    ParamSpec {
        name: "timeout",
        description: "timeout after T seconds",
        default: None,
        metavar: "T",
    },
];

/// stress-ng load module.
pub struct Stressng {
    params: ModuleParams,
    args: Vec<String>,
    logdir: Option<PathBuf>,
    io: Option<UnitIo>,
    unit: Option<WorkUnit>,
    started: bool,
    started_at: Option<Instant>,
    backoff: OomBackoff,
    grace: Duration,
}

impl Stressng {
    /// Create the module with its configured parameters.
    pub fn new(params: ModuleParams) -> Self {
        Self {
            params,
            args: Vec::new(),
            logdir: None,
            io: None,
            unit: None,
            started: false,
            started_at: None,
            backoff: OomBackoff::new(Duration::from_secs(5), Duration::from_secs(60)),
            grace: Duration::from_secs(2),
        }
    }

    /// Boxed constructor for the registry.
    pub fn create(params: ModuleParams) -> Box<dyn Module> {
        Box::new(Self::new(params))
    }

    /// Arguments passed to `stress-ng`, available after setup.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl Module for Stressng {
    fn name(&self) -> &str {
        NAME
    }

    fn kind(&self) -> ModuleKind {
        ModuleKind::Load
    }

    fn setup(&mut self, ctx: &SetupContext<'_>) -> RtevalResult<SetupOutcome> {
        let Some(option) = self.params.get_str("option") else {
            return Ok(SetupOutcome::DoNotRun("no stressor option given".into()));
        };

        self.args = vec![format!("--{option}")];
        if let Some(arg) = self.params.get_str("arg") {
            self.args.push(arg);
        }
        if let Some(timeout) = self.params.get::<u64>(NAME, "timeout")? {
            self.args.push("--timeout".into());
            self.args.push(timeout.to_string());
        }

        if ctx.cpulist.is_some() {
            let placement = node_placement(NAME, ctx.topology, ctx.cpulist);
            let cpus: CpuList = placement.values().flat_map(CpuList::iter).collect();
            if cpus.is_empty() {
                return Ok(SetupOutcome::DoNotRun("no CPUs available".into()));
            }
            self.args.push("--taskset".into());
            self.args.push(cpus.collapse());
        }

        self.logdir = ctx.shared.logdir();
        self.backoff = OomBackoff::new(ctx.timing.oom_initial_backoff, ctx.timing.oom_max_backoff);
        self.grace = ctx.timing.stop_grace;
        Ok(SetupOutcome::Run)
    }

    fn prepare(&mut self) -> RtevalResult<()> {
        self.io = Some(UnitIo::open(self.logdir.as_deref(), NAME)?);
        Ok(())
    }

    fn task(&mut self, ctx: &TaskContext<'_>) -> RtevalResult<()> {
        if let Some(unit) = self.unit.as_mut() {
            return match unit.poll()? {
                Some(UnitExit::Failed(status)) => Err(RtevalError::ModuleFailure {
                    module: NAME.into(),
                    status,
                }),
                Some(UnitExit::OutOfMemory) if !ctx.stop.is_stopped() => {
                    let ran_for = self
                        .started_at
                        .map_or(Duration::ZERO, |at| ctx.now.saturating_duration_since(at));
                    let delay = self.backoff.record_kill(ctx.now, ran_for);
                    debug!(?delay, "Killed for memory, backing off");
                    self.unit = None;
                    self.started = false;
                    Ok(())
                }
                Some(UnitExit::Clean) => {
                    // ran its course (--timeout), not restarted
                    self.backoff.reset();
                    Ok(())
                }
                _ => Ok(()),
            };
        }
        if self.started || ctx.stop.is_stopped() || !self.backoff.ready(ctx.now) {
            return Ok(());
        }

        let mut cmd = Command::new("stress-ng");
        cmd.args(&self.args);
        let io = self.io.get_or_insert_with(UnitIo::null);
        match WorkUnit::spawn(NAME, "global", cmd, io)? {
            Spawned::Started(unit) => {
                debug!(args = ?self.args, "Running");
                self.unit = Some(unit);
                self.started = true;
                self.started_at = Some(ctx.now);
            }
            Spawned::OutOfMemory => {
                let delay = self.backoff.record_failure(ctx.now);
                debug!(?delay, "Failed to run, backing off");
            }
        }
        Ok(())
    }

    fn live_units(&mut self) -> usize {
        usize::from(self.unit.as_mut().is_some_and(WorkUnit::is_running))
    }

    fn cleanup(&mut self) -> RtevalResult<()> {
        if let Some(mut unit) = self.unit.take() {
            debug!("Sending SIGINT");
            unit.terminate(Signal::SIGINT, self.grace);
        }
        self.io = None;
        Ok(())
    }

    fn report(&self) -> serde_json::Value {
        serde_json::json!({
            "args": self.args,
            "oom_failures": self.backoff.failures(),
        })
    }
}

//! hackbench: scheduler and IPC load, one unit per NUMA node.

use super::{node_placement, Binder};
use crate::backoff::OomBackoff;
use crate::module::{Module, ModuleKind, SetupContext, SetupOutcome, TaskContext};
use crate::process::{Spawned, UnitExit, UnitIo, WorkUnit};
use nix::sys::signal::Signal;
use rteval_common::error::{RtevalError, RtevalResult};
use rteval_common::params::{ModuleParams, ParamSpec};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Registry name.
pub const NAME: &str = "hackbench";

/// Below this much memory per core the module does not run.
const MIN_GIB_PER_CORE: f64 = 0.75;

/// Recognized options.
pub const PARAMETERS: &[ParamSpec] = &[
    ParamSpec {
        name: "jobspercore",
        description: "Number of working threads per CPU core",
        default: Some("5"),
        metavar: "NUM",
    },
    ParamSpec {
        name: "loops",
        description: "Messages each sender sends",
        default: Some("1000"),
        metavar: "NUM",
    },
    ParamSpec {
        name: "datasize",
        description: "Message size in bytes",
        default: Some("1000"),
        metavar: "BYTES",
    },
];

struct Slot {
    label: String,
    binder: Binder,
    unit: Option<WorkUnit>,
    started_at: Option<Instant>,
}

/// hackbench load module.
pub struct Hackbench {
    params: ModuleParams,
    args: Vec<String>,
    groups: usize,
    slots: Vec<Slot>,
    logdir: Option<PathBuf>,
    io: Option<UnitIo>,
    backoff: OomBackoff,
    grace: Duration,
    starts: u64,
}

impl Hackbench {
    /// Create the module with its configured parameters.
    pub fn new(mut params: ModuleParams) -> Self {
        params.apply_defaults(PARAMETERS);
        Self {
            params,
            args: Vec::new(),
            groups: 0,
            slots: Vec::new(),
            logdir: None,
            io: None,
            backoff: OomBackoff::new(Duration::from_secs(5), Duration::from_secs(60)),
            grace: Duration::from_secs(2),
            starts: 0,
        }
    }

    /// Boxed constructor for the registry.
    pub fn create(params: ModuleParams) -> Box<dyn Module> {
        Box::new(Self::new(params))
    }

    fn start_slot(&mut self, idx: usize, ctx: &TaskContext<'_>) -> RtevalResult<()> {
        if !self.backoff.ready(ctx.now) {
            return Ok(());
        }
        let io = self.io.get_or_insert_with(UnitIo::null);
        let slot = &mut self.slots[idx];
        let cmd = slot.binder.command(NAME, &self.args);
        match WorkUnit::spawn(NAME, &slot.label, cmd, io)? {
            Spawned::Started(unit) => {
                slot.unit = Some(unit);
                slot.started_at = Some(ctx.now);
                self.starts += 1;
            }
            Spawned::OutOfMemory => {
                let delay = self.backoff.record_failure(ctx.now);
                debug!(unit = %slot.label, ?delay, "Out of memory, backing off");
            }
        }
        Ok(())
    }
}

impl Module for Hackbench {
    fn name(&self) -> &str {
        NAME
    }

    fn kind(&self) -> ModuleKind {
        ModuleKind::Load
    }

    fn setup(&mut self, ctx: &SetupContext<'_>) -> RtevalResult<SetupOutcome> {
        let ratio = ctx.shared.gib_per_core();
        if ratio < MIN_GIB_PER_CORE {
            return Ok(SetupOutcome::DoNotRun(format!(
                "Low memory system ({ratio:.2} GB/core)"
            )));
        }

        let jobspercore: usize = self.params.get_or(NAME, "jobspercore", 5)?;
        let loops: u64 = self.params.get_or(NAME, "loops", 1000)?;
        let datasize: u64 = self.params.get_or(NAME, "datasize", 1000)?;
        if jobspercore == 0 {
            return Err(RtevalError::config(NAME, "jobspercore must be at least 1"));
        }

        let placement = node_placement(NAME, ctx.topology, ctx.cpulist);
        if placement.is_empty() {
            return Ok(SetupOutcome::DoNotRun("no CPUs available".into()));
        }

        let biggest = placement.values().map(|cpus| cpus.len()).max().unwrap_or(0);
        self.groups = biggest * jobspercore;
        self.args = vec![
            "-P".into(),
            "-g".into(),
            self.groups.to_string(),
            "-l".into(),
            loops.to_string(),
            "-s".into(),
            datasize.to_string(),
        ];

        let restricted = ctx.cpulist.is_some();
        self.slots = if placement.len() > 1 {
            info!(nodes = placement.len(), "Running with multiple nodes");
            placement
                .iter()
                .map(|(&node, cpus)| Slot {
                    label: format!("node{node}"),
                    binder: Binder::for_node(node, cpus, restricted, ctx.has_numactl),
                    unit: None,
                    started_at: None,
                })
                .collect()
        } else {
            let binder = match (restricted, placement.values().next()) {
                (true, Some(cpus)) => Binder::Taskset(cpus.clone()),
                _ => Binder::Unbound,
            };
            vec![Slot {
                label: "global".into(),
                binder,
                unit: None,
                started_at: None,
            }]
        };

        self.logdir = ctx.shared.logdir();
        self.backoff = OomBackoff::new(ctx.timing.oom_initial_backoff, ctx.timing.oom_max_backoff);
        self.grace = ctx.timing.stop_grace;
        debug!(groups = self.groups, units = self.slots.len(), "Configured");
        Ok(SetupOutcome::Run)
    }

    fn prepare(&mut self) -> RtevalResult<()> {
        self.io = Some(UnitIo::open(self.logdir.as_deref(), NAME)?);
        Ok(())
    }

    fn task(&mut self, ctx: &TaskContext<'_>) -> RtevalResult<()> {
        for idx in 0..self.slots.len() {
            if ctx.stop.is_stopped() {
                return Ok(());
            }
            let exit = match self.slots[idx].unit.as_mut() {
                None => None,
                Some(unit) => match unit.poll()? {
                    None => continue,
                    Some(exit) => Some(exit),
                },
            };
            match &exit {
                None | Some(UnitExit::Clean | UnitExit::Stopped | UnitExit::OutOfMemory) => {
                    // short-lived by nature, restart whatever finished
                    let slot = &mut self.slots[idx];
                    match &exit {
                        Some(UnitExit::Clean) => self.backoff.reset(),
                        Some(UnitExit::OutOfMemory) => {
                            let ran_for = slot
                                .started_at
                                .map_or(Duration::ZERO, |at| ctx.now.saturating_duration_since(at));
                            let delay = self.backoff.record_kill(ctx.now, ran_for);
                            debug!(unit = %slot.label, ?delay, "Killed for memory, backing off");
                        }
                        _ => {}
                    }
                    slot.unit = None;
                    slot.started_at = None;
                    self.start_slot(idx, ctx)?;
                }
                Some(UnitExit::Failed(status)) => {
                    return Err(RtevalError::ModuleFailure {
                        module: NAME.into(),
                        status: format!("{}: {status}", self.slots[idx].label),
                    });
                }
            }
        }
        Ok(())
    }

    fn live_units(&mut self) -> usize {
        self.slots
            .iter_mut()
            .filter_map(|s| s.unit.as_mut())
            .map(|u| usize::from(u.is_running()))
            .sum()
    }

    fn is_alive(&mut self) -> bool {
        // units come and go between polls
        true
    }

    fn cleanup(&mut self) -> RtevalResult<()> {
        for slot in &mut self.slots {
            if let Some(mut unit) = slot.unit.take() {
                info!(unit = %slot.label, "Cleaning up hackbench");
                unit.terminate(Signal::SIGKILL, self.grace);
            }
        }
        self.io = None;
        Ok(())
    }

    fn report(&self) -> serde_json::Value {
        serde_json::json!({
            "groups": self.groups,
            "units": self.slots.iter().map(|s| {
                serde_json::json!({ "label": s.label, "binder": s.binder.to_string() })
            }).collect::<Vec<_>>(),
            "starts": self.starts,
            "oom_failures": self.backoff.failures(),
        })
    }
}

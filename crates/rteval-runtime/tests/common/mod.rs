//! Scripted modules and a fake host for run loop tests.

#![allow(dead_code)]

use rteval_common::config::{RunConfig, TimingConfig};
use rteval_common::error::{RtevalError, RtevalResult};
use rteval_common::params::SharedParams;
use rteval_runtime::{
    CpuList, LoadModules, Module, ModuleKind, NumaNode, SetupContext, SetupOutcome, SystemTopology,
    TaskContext,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How often each phase was entered.
#[derive(Debug, Default)]
pub struct Calls {
    pub setup: AtomicU32,
    pub build: AtomicU32,
    pub prepare: AtomicU32,
    pub task: AtomicU32,
    pub cleanup: AtomicU32,
    pub finalize: AtomicU32,
}

impl Calls {
    pub fn get(counter: &AtomicU32) -> u32 {
        counter.load(Ordering::SeqCst)
    }
}

/// A module whose behaviour is scripted by its builder methods.
pub struct Fake {
    name: &'static str,
    kind: ModuleKind,
    outcome: SetupOutcome,
    with_loads: bool,
    units: usize,
    alive_for: Option<Duration>,
    fail_after: Option<u32>,
    first_task: Option<Instant>,
    calls: Arc<Calls>,
}

impl Fake {
    pub fn load(name: &'static str) -> Self {
        Self::new(name, ModuleKind::Load)
    }

    pub fn measurement(name: &'static str) -> Self {
        Self::new(name, ModuleKind::Measurement)
    }

    fn new(name: &'static str, kind: ModuleKind) -> Self {
        Self {
            name,
            kind,
            outcome: SetupOutcome::Run,
            with_loads: true,
            units: 1,
            alive_for: None,
            fail_after: None,
            first_task: None,
            calls: Arc::new(Calls::default()),
        }
    }

    pub fn calls(&self) -> Arc<Calls> {
        Arc::clone(&self.calls)
    }

    pub fn sharing(mut self, calls: &Arc<Calls>) -> Self {
        self.calls = Arc::clone(calls);
        self
    }

    pub fn units(mut self, units: usize) -> Self {
        self.units = units;
        self
    }

    pub fn alive_for(mut self, lifetime: Duration) -> Self {
        self.alive_for = Some(lifetime);
        self
    }

    pub fn fail_after(mut self, tasks: u32) -> Self {
        self.fail_after = Some(tasks);
        self
    }

    pub fn do_not_run(mut self, reason: &str) -> Self {
        self.outcome = SetupOutcome::DoNotRun(reason.to_string());
        self
    }

    pub fn without_loads(mut self) -> Self {
        self.with_loads = false;
        self
    }

    pub fn boxed(self) -> Box<dyn Module> {
        Box::new(self)
    }

    fn alive(&self) -> bool {
        match (self.alive_for, self.first_task) {
            (Some(lifetime), Some(first)) => first.elapsed() < lifetime,
            _ => true,
        }
    }
}

impl Module for Fake {
    fn name(&self) -> &str {
        self.name
    }

    fn kind(&self) -> ModuleKind {
        self.kind
    }

    fn setup(&mut self, _ctx: &SetupContext<'_>) -> RtevalResult<SetupOutcome> {
        self.calls.setup.fetch_add(1, Ordering::SeqCst);
        Ok(self.outcome.clone())
    }

    fn build(&mut self) -> RtevalResult<()> {
        self.calls.build.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn prepare(&mut self) -> RtevalResult<()> {
        self.calls.prepare.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn task(&mut self, ctx: &TaskContext<'_>) -> RtevalResult<()> {
        let done = self.calls.task.fetch_add(1, Ordering::SeqCst) + 1;
        self.first_task.get_or_insert(ctx.now);
        if self.fail_after.is_some_and(|limit| done >= limit) {
            return Err(RtevalError::ModuleFailure {
                module: self.name.to_string(),
                status: "exit status: 3".into(),
            });
        }
        Ok(())
    }

    fn live_units(&mut self) -> usize {
        if self.alive() {
            self.units
        } else {
            0
        }
    }

    fn cleanup(&mut self) -> RtevalResult<()> {
        self.calls.cleanup.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn finalize(&mut self) -> RtevalResult<()> {
        self.calls.finalize.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn report(&self) -> serde_json::Value {
        serde_json::json!({ "units": self.units })
    }

    fn with_loads(&self) -> bool {
        self.with_loads
    }
}

/// Run configuration with millisecond timings.
pub fn fast_config(duration: Duration, report_interval: Duration) -> RunConfig {
    let mut config = RunConfig::default();
    config.duration = duration;
    config.report_interval = report_interval;
    config.timing = TimingConfig {
        settle: Duration::from_millis(10),
        poll_interval: Duration::from_millis(10),
        loadavg_every: 2,
        task_interval: Duration::from_millis(5),
        stop_grace: Duration::from_millis(50),
        oom_initial_backoff: Duration::from_millis(10),
        oom_max_backoff: Duration::from_millis(40),
    };
    config
}

/// A two-node, four-CPU host.
pub struct FakeHost {
    pub shared: SharedParams,
    pub topology: SystemTopology,
    pub timing: TimingConfig,
}

impl FakeHost {
    pub fn new(config: &RunConfig) -> Self {
        let topology = SystemTopology::from_nodes(vec![
            NumaNode::new(0, CpuList::new([0, 1]), BTreeMap::new()),
            NumaNode::new(1, CpuList::new([2, 3]), BTreeMap::new()),
        ])
        .unwrap();
        Self {
            shared: SharedParams {
                workdir: "/tmp".into(),
                reportdir: None,
                builddir: "/tmp/rteval-build".into(),
                srcdir: "/tmp".into(),
                numcores: 4,
                memsize: 8 << 30,
                numanodes: 2,
                duration: config.duration,
                logging: false,
            },
            topology,
            timing: config.timing.clone(),
        }
    }

    pub fn ctx(&self) -> SetupContext<'_> {
        SetupContext {
            shared: &self.shared,
            topology: &self.topology,
            cpulist: None,
            timing: &self.timing,
            has_numactl: false,
        }
    }

    /// Configured load modules, as the run loop's factory returns them.
    pub fn loads(&self, modules: Vec<Box<dyn Module>>) -> RtevalResult<LoadModules> {
        let mut loads = LoadModules::new(modules, self.timing.task_interval);
        loads.configure(&self.ctx())?;
        Ok(loads)
    }
}

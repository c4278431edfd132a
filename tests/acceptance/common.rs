//! Common utilities for acceptance tests.
//!
//! Provides helpers for:
//! - Checking real-time prerequisites (PREEMPT_RT, privileges, tools)
//! - Building a short run configuration in a scratch directory
//! - Running loads and measurements against the real host

#![allow(dead_code)]

use rteval_common::config::{ModuleSetConfig, RunConfig};
use rteval_common::error::RtevalResult;
use rteval_common::params::SharedParams;
use rteval_runtime::host::{check_rt_capabilities, find_executable};
use rteval_runtime::{registry, LoadModules, MeasurementModules, RunLoop, RunOutcome, SetupContext, StopToken, SystemTopology};
use std::path::Path;
use std::time::Duration;

/// Check all prerequisites for a real run.
pub fn check_rt_prerequisites(tools: &[&str]) -> Result<(), String> {
    let caps = check_rt_capabilities();
    let mut errors = Vec::new();

    if !caps.is_root {
        errors.push("Not running as root - SCHED_FIFO measurement will fail".to_string());
    }
    if !caps.preempt_rt {
        eprintln!("WARNING: PREEMPT_RT kernel not detected - latency results may be unreliable");
    }
    for tool in tools {
        if find_executable(tool).is_none() {
            errors.push(format!("{tool} not found"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join("; "))
    }
}

/// A short run with quick supervision timings.
pub fn short_config(workdir: &Path, duration: Duration, loads: &[&str]) -> RunConfig {
    let mut config = RunConfig::default();
    config.duration = duration;
    config.report_interval = Duration::from_secs(5);
    config.workdir = workdir.to_path_buf();
    config.timing.settle = Duration::from_secs(2);
    config.timing.poll_interval = Duration::from_secs(1);
    config.loads = ModuleSetConfig::with_modules(loads);
    config
}

/// Run `config` on this host, the way the rteval binary does.
pub fn run_on_host(config: &RunConfig, reportdir: &Path) -> RtevalResult<RunOutcome> {
    let topology = SystemTopology::discover()?;
    let shared = SharedParams {
        workdir: config.workdir.clone(),
        reportdir: Some(reportdir.to_path_buf()),
        builddir: config.workdir.join("rteval-build"),
        srcdir: config.srcdir.clone(),
        numcores: topology.all_cpus().len(),
        memsize: topology.total_memory(),
        numanodes: topology.node_count(),
        duration: config.duration,
        logging: false,
    };
    let ctx = SetupContext {
        shared: &shared,
        topology: &topology,
        cpulist: None,
        timing: &config.timing,
        has_numactl: find_executable("numactl").is_some(),
    };

    let mut measurements = MeasurementModules::new(
        registry::create_measurements(&config.measurement)?,
        config.timing.task_interval,
    );
    measurements.configure(&ctx)?;

    RunLoop::new(config, StopToken::new())
        .handle_signals(false)
        .run(measurements, || {
            let mut loads = LoadModules::new(registry::create_loads(&config.loads)?, config.timing.task_interval);
            loads.configure(&ctx)?;
            Ok(loads)
        })
}

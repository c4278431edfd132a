//! cyclictest: wake-up latency on every measured CPU.
//!
//! cyclictest runs until it is interrupted. With `-h` it writes a
//! histogram file on exit, one row per microsecond bucket with one column
//! per thread, followed by `#` summary lines. [`parse_histogram`] turns
//! that file into [`LatencyStats`].

use crate::module::{Module, ModuleKind, SetupContext, SetupOutcome, TaskContext};
use crate::process::{Spawned, UnitExit, UnitIo, WorkUnit};
use crate::topology::CpuList;
use nix::sys::signal::Signal;
use rteval_common::error::{RtevalError, RtevalResult};
use rteval_common::params::{ModuleParams, ParamSpec};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Registry name.
pub const NAME: &str = "cyclictest";

/// Recognized options.
pub const PARAMETERS: &[ParamSpec] = &[
    ParamSpec {
        name: "interval",
        description: "Base interval of the threads in microseconds",
        default: Some("100"),
        metavar: "INTV_US",
    },
    ParamSpec {
        name: "priority",
        description: "Run measurement threads at this SCHED_FIFO priority",
        default: Some("95"),
        metavar: "PRIO",
    },
    ParamSpec {
        name: "buckets",
        description: "Histogram width in microseconds",
        default: Some("2000"),
        metavar: "NUM",
    },
    ParamSpec {
        name: "with_loads",
        description: "Measure while the load modules run",
        default: Some("true"),
        metavar: "BOOL",
    },
];

/// Latency statistics in microseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LatencyStats {
    /// Minimum latency.
    pub min_us: u64,
    /// Average latency.
    pub avg_us: f64,
    /// Maximum latency.
    pub max_us: u64,
    /// 99th percentile.
    pub p99_us: u64,
    /// 99.9th percentile.
    pub p999_us: u64,
    /// 99.999th percentile.
    pub p99999_us: u64,
    /// Total number of samples.
    pub samples: u64,
    /// Samples beyond the last bucket.
    pub overflows: u64,
}

/// Parse a cyclictest histogram file.
///
/// Returns `None` when the file holds no samples.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn parse_histogram(content: &str) -> Option<LatencyStats> {
    let mut histogram: Vec<(u64, u64)> = Vec::new();
    let mut total: u64 = 0;
    let mut summary_min: Option<u64> = None;
    let mut summary_max: Option<u64> = None;
    let mut overflows: u64 = 0;

    for line in content.lines() {
        if let Some(comment) = line.strip_prefix('#') {
            let Some((key, values)) = comment.split_once(':') else {
                continue;
            };
            let values = values.split_whitespace().filter_map(|v| v.parse::<u64>().ok());
            match key.trim() {
                "Min Latencies" => summary_min = values.min(),
                "Max Latencies" => summary_max = values.max(),
                "Histogram Overflows" => overflows = values.sum(),
                _ => {}
            }
            continue;
        }

        let mut parts = line.split_whitespace();
        let Some(Ok(latency)) = parts.next().map(str::parse::<u64>) else {
            continue;
        };
        let count: u64 = parts.filter_map(|v| v.parse::<u64>().ok()).sum();
        if count > 0 {
            histogram.push((latency, count));
            total += count;
        }
    }

    if total == 0 {
        return None;
    }

    let weighted: u64 = histogram.iter().map(|(latency, count)| latency * count).sum();
    let mut stats = LatencyStats {
        min_us: summary_min.unwrap_or(histogram[0].0),
        avg_us: weighted as f64 / total as f64,
        max_us: summary_max.unwrap_or(histogram[histogram.len() - 1].0),
        samples: total,
        overflows,
        ..LatencyStats::default()
    };

    let threshold = |fraction: f64| ((total as f64 * fraction).ceil() as u64).max(1);
    let p99_threshold = threshold(0.99);
    let p999_threshold = threshold(0.999);
    let p99999_threshold = threshold(0.99999);

    let mut cumulative: u64 = 0;
    let (mut p99, mut p999, mut p99999) = (None, None, None);
    for &(latency, count) in &histogram {
        cumulative += count;
        if p99.is_none() && cumulative >= p99_threshold {
            p99 = Some(latency);
        }
        if p999.is_none() && cumulative >= p999_threshold {
            p999 = Some(latency);
        }
        if p99999.is_none() && cumulative >= p99999_threshold {
            p99999 = Some(latency);
        }
    }
    stats.p99_us = p99.unwrap_or(stats.max_us);
    stats.p999_us = p999.unwrap_or(stats.max_us);
    stats.p99999_us = p99999.unwrap_or(stats.max_us);
    Some(stats)
}

/// cyclictest measurement module.
pub struct Cyclictest {
    params: ModuleParams,
    with_loads: bool,
    cpus: CpuList,
    args: Vec<String>,
    histfile: PathBuf,
    logdir: Option<PathBuf>,
    io: Option<UnitIo>,
    unit: Option<WorkUnit>,
    started: bool,
    grace: Duration,
    stats: Option<LatencyStats>,
}

impl Cyclictest {
    /// Create the module with its configured parameters.
    pub fn new(mut params: ModuleParams) -> Self {
        params.apply_defaults(PARAMETERS);
        let with_loads = params.get_or(NAME, "with_loads", true).unwrap_or(true);
        Self {
            params,
            with_loads,
            cpus: CpuList::default(),
            args: Vec::new(),
            histfile: PathBuf::new(),
            logdir: None,
            io: None,
            unit: None,
            started: false,
            grace: Duration::from_secs(2),
            stats: None,
        }
    }

    /// Boxed constructor for the registry.
    pub fn create(params: ModuleParams) -> Box<dyn Module> {
        Box::new(Self::new(params))
    }

    /// Arguments passed to `cyclictest`, available after setup.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Statistics, available after finalize.
    #[must_use]
    pub fn stats(&self) -> Option<&LatencyStats> {
        self.stats.as_ref()
    }
}

impl Module for Cyclictest {
    fn name(&self) -> &str {
        NAME
    }

    fn kind(&self) -> ModuleKind {
        ModuleKind::Measurement
    }

    fn setup(&mut self, ctx: &SetupContext<'_>) -> RtevalResult<SetupOutcome> {
        let interval: u64 = self.params.get_or(NAME, "interval", 100)?;
        let priority: u32 = self.params.get_or(NAME, "priority", 95)?;
        let buckets: u64 = self.params.get_or(NAME, "buckets", 2000)?;
        self.with_loads = self.params.get_or(NAME, "with_loads", true)?;
        if interval == 0 || buckets == 0 {
            return Err(RtevalError::config(NAME, "interval and buckets must be at least 1"));
        }
        if !(1..=99).contains(&priority) {
            return Err(RtevalError::config(NAME, "priority must be between 1 and 99"));
        }

        self.cpus = match ctx.cpulist {
            Some(allowed) => ctx.topology.all_cpus().intersect(allowed),
            None => ctx.topology.all_cpus(),
        };
        if self.cpus.is_empty() {
            return Ok(SetupOutcome::DoNotRun("no CPUs available".into()));
        }

        let dir = ctx.shared.reportdir.as_ref().unwrap_or(&ctx.shared.workdir);
        self.histfile = dir.join("cyclictest.hist");
        self.args = vec![
            "-i".into(),
            interval.to_string(),
            "-q".into(),
            "-m".into(),
            "-h".into(),
            buckets.to_string(),
            "-p".into(),
            priority.to_string(),
            "-t".into(),
            self.cpus.len().to_string(),
            "-a".into(),
            self.cpus.collapse(),
            format!("--histfile={}", self.histfile.display()),
        ];

        self.logdir = ctx.shared.logdir();
        self.grace = ctx.timing.stop_grace;
        debug!(cpus = %self.cpus, histfile = %self.histfile.display(), "Configured");
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
                Some(UnitExit::OutOfMemory) => Err(RtevalError::ModuleFailure {
                    module: NAME.into(),
                    status: "killed".into(),
                }),
                // an exited measurement is not restarted
                _ => Ok(()),
            };
        }
        if self.started || ctx.stop.is_stopped() {
            return Ok(());
        }

        let mut cmd = Command::new(NAME);
        cmd.args(&self.args);
        let io = self.io.get_or_insert_with(UnitIo::null);
        match WorkUnit::spawn(NAME, "global", cmd, io)? {
            Spawned::Started(unit) => {
                info!(cpus = %self.cpus, "Measuring");
                self.unit = Some(unit);
                self.started = true;
                Ok(())
            }
            Spawned::OutOfMemory => Err(RtevalError::ModuleFailure {
                module: NAME.into(),
                status: "out of memory at start".into(),
            }),
        }
    }

    fn live_units(&mut self) -> usize {
        usize::from(self.unit.as_mut().is_some_and(WorkUnit::is_running))
    }

    fn cleanup(&mut self) -> RtevalResult<()> {
        if let Some(mut unit) = self.unit.take() {
            // SIGINT makes cyclictest write the histogram
            unit.terminate(Signal::SIGINT, self.grace);
        }
        self.io = None;
        Ok(())
    }

    fn finalize(&mut self) -> RtevalResult<()> {
        if !self.started {
            return Ok(());
        }
        let content = fs::read_to_string(&self.histfile)
            .map_err(|e| RtevalError::io(&format!("reading {}", self.histfile.display()), &e))?;
        self.stats = parse_histogram(&content);
        match &self.stats {
            Some(stats) => info!(
                samples = stats.samples,
                min_us = stats.min_us,
                max_us = stats.max_us,
                p99_us = stats.p99_us,
                "Histogram parsed"
            ),
            None => warn!(histfile = %self.histfile.display(), "No samples collected"),
        }
        Ok(())
    }

    fn report(&self) -> serde_json::Value {
        serde_json::json!({
            "cpus": self.cpus.to_string(),
            "histfile": self.histfile,
            "stats": self.stats,
        })
    }

    fn with_loads(&self) -> bool {
        self.with_loads
    }
}

//! rteval entry point.
//!
//! Loads the configuration, discovers the host topology, and runs the
//! configured loads and measurements for the requested duration. The exit
//! status is 0 for a full run, 1 when measurement ended early, and 2 on a
//! fatal error.

mod report;

use anyhow::{Context, Result};
use clap::Parser;
use rteval_common::config::RunConfig;
use rteval_common::params::SharedParams;
use rteval_runtime::host::{find_executable, preflight};
use rteval_runtime::registry;
use rteval_runtime::{
    CpuList, LoadModules, MeasurementModules, RunLoop, SetupContext, StopToken, SysfsCpuOnline,
    SystemTopology,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info, warn};

/// rteval command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "rteval",
    about = "Evaluate real-time latency of a Linux system under load",
    version,
    long_about = None
)]
struct Args {
    /// Path to a run configuration file (TOML).
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Measurement duration, e.g. "90s" or "12h" (overrides config file).
    #[arg(long, short = 'd', value_parser = humantime::parse_duration)]
    duration: Option<Duration>,

    /// Working directory for builds and reports.
    #[arg(long, short = 'w', value_name = "DIR")]
    workdir: Option<PathBuf>,

    /// CPUs the load modules may use (cpulist syntax).
    #[arg(long, value_name = "CPULIST")]
    loads_cpulist: Option<String>,

    /// CPUs to measure on (cpulist syntax).
    #[arg(long, value_name = "CPULIST")]
    measurement_cpulist: Option<String>,

    /// Interval between status reports, "0s" to disable.
    #[arg(long, value_parser = humantime::parse_duration)]
    report_interval: Option<Duration>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, short = 'l', default_value = "info")]
    log_level: String,

    /// List the available modules and their options, then exit.
    #[arg(long)]
    list_modules: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    init_logging(&args.log_level);

    if args.list_modules {
        print!("{}", report::module_listing());
        return ExitCode::SUCCESS;
    }

    info!(version = env!("CARGO_PKG_VERSION"), "Starting rteval");

    match run(&args) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!(error = %format!("{e:#}"), "rteval failed");
            ExitCode::from(2)
        }
    }
}

/// Initialize logging with the specified log level.
fn init_logging(level: &str) {
    let filter = format!("rteval={level},rteval_runtime={level},rteval_common={level}");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter)),
        )
        .with_target(true)
        .with_thread_ids(true)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Resolution priority (first existing file wins):
/// 1. Command-line `--config` argument
/// 2. `RTEVAL_CONFIG_PATH` environment variable
/// 3. `/etc/rteval/config.toml` (system path)
/// 4. `config/default.toml` (local development)
/// 5. Built-in defaults
fn load_config(args: &Args) -> Result<RunConfig> {
    if let Some(config_path) = &args.config {
        info!(?config_path, "Loading config from command-line argument");
        return RunConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {config_path:?}"));
    }

    if let Ok(env_path) = std::env::var("RTEVAL_CONFIG_PATH") {
        let config_path = PathBuf::from(&env_path);
        if config_path.exists() {
            info!(?config_path, "Loading config from RTEVAL_CONFIG_PATH");
            return RunConfig::from_file(&config_path).with_context(|| {
                format!("Failed to load config from RTEVAL_CONFIG_PATH={env_path:?}")
            });
        }
        warn!(
            path = %env_path,
            "RTEVAL_CONFIG_PATH set but file does not exist, checking other locations"
        );
    }

    for path in ["/etc/rteval/config.toml", "config/default.toml"] {
        let config_path = PathBuf::from(path);
        if config_path.exists() {
            info!(?config_path, "Loading config file");
            return RunConfig::from_file(&config_path)
                .with_context(|| format!("Failed to load config from {config_path:?}"));
        }
    }

    info!("No config file found, using built-in defaults");
    Ok(RunConfig::default())
}

/// Apply command-line overrides on top of the loaded configuration.
fn apply_overrides(config: &mut RunConfig, args: &Args) {
    if let Some(duration) = args.duration {
        config.duration = duration;
    }
    if let Some(workdir) = &args.workdir {
        config.workdir.clone_from(workdir);
    }
    if let Some(interval) = args.report_interval {
        config.report_interval = interval;
    }
    if args.loads_cpulist.is_some() {
        config.loads.cpulist.clone_from(&args.loads_cpulist);
    }
    if args.measurement_cpulist.is_some() {
        config.measurement.cpulist.clone_from(&args.measurement_cpulist);
    }
}

/// Parse a configured cpulist and drop offline CPUs.
fn resolve_cpulist(section: &str, spec: Option<&str>) -> Result<Option<CpuList>> {
    let Some(spec) = spec else {
        return Ok(None);
    };
    let requested: CpuList = spec
        .parse()
        .with_context(|| format!("Invalid {section} cpulist {spec:?}"))?;
    let online = requested.filter_online(&SysfsCpuOnline::new("/sys/devices/system/cpu"));
    if online.len() < requested.len() {
        warn!(section, requested = %requested, online = %online, "Ignoring offline CPUs");
    }
    Ok(Some(online))
}

fn run(args: &Args) -> Result<u8> {
    let mut config = load_config(args)?;
    apply_overrides(&mut config, args);
    config.validate().context("Invalid configuration")?;

    let topology = SystemTopology::discover().context("Failed to discover system topology")?;
    info!(%topology, "Topology discovered");

    let loads_cpulist = resolve_cpulist("loads", config.loads.cpulist.as_deref())?;
    let measurement_cpulist = resolve_cpulist("measurement", config.measurement.cpulist.as_deref())?;

    let reportdir = report::create_report_dir(&config.workdir, config.logging)?;
    info!(reportdir = %reportdir.display(), "Report directory created");

    let capabilities = preflight();
    let has_numactl = find_executable("numactl").is_some();

    let shared = shared_params(&config, &topology, &reportdir);
    let timing = config.timing.clone();
    let loads_ctx = SetupContext {
        shared: &shared,
        topology: &topology,
        cpulist: loads_cpulist.as_ref(),
        timing: &timing,
        has_numactl,
    };
    let measurement_ctx = SetupContext {
        cpulist: measurement_cpulist.as_ref(),
        ..loads_ctx
    };

    let mut measurements = MeasurementModules::new(
        registry::create_measurements(&config.measurement)?,
        timing.task_interval,
    );
    measurements.configure(&measurement_ctx)?;
    if measurements.is_empty() {
        warn!("No measurement modules configured");
    }

    let run_loop = RunLoop::new(&config, StopToken::new());
    let outcome = run_loop.run(measurements, || {
        let mut loads = LoadModules::new(registry::create_loads(&config.loads)?, timing.task_interval);
        loads.configure(&loads_ctx)?;
        Ok(loads)
    })?;

    let summary = report::write_summary(&reportdir, &config, &topology, &capabilities, &outcome)?;
    info!(summary = %summary.display(), "Summary written");

    if outcome.early_stop() {
        warn!("Measurement stopped early");
    }
    Ok(u8::try_from(outcome.exit_code()).unwrap_or(2))
}

fn shared_params(config: &RunConfig, topology: &SystemTopology, reportdir: &Path) -> SharedParams {
    SharedParams {
        workdir: config.workdir.clone(),
        reportdir: Some(reportdir.to_path_buf()),
        builddir: config.workdir.join("rteval-build"),
        srcdir: config.srcdir.clone(),
        numcores: topology.all_cpus().len(),
        memsize: topology.total_memory(),
        numanodes: topology.node_count(),
        duration: config.duration,
        logging: config.logging,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parsing() {
        let args = Args::parse_from(["rteval", "--duration", "90s", "--loads-cpulist", "2-5"]);
        assert_eq!(args.duration, Some(Duration::from_secs(90)));
        assert_eq!(args.loads_cpulist.as_deref(), Some("2-5"));
        assert!(args.config.is_none());
        assert!(!args.list_modules);
    }

    #[test]
    fn test_overrides() {
        let args = Args::parse_from([
            "rteval",
            "-w",
            "/scratch",
            "--report-interval",
            "0s",
            "--measurement-cpulist",
            "7",
        ]);
        let mut config = RunConfig::default();
        apply_overrides(&mut config, &args);
        assert_eq!(config.workdir, PathBuf::from("/scratch"));
        assert_eq!(config.report_interval, Duration::ZERO);
        assert_eq!(config.measurement.cpulist.as_deref(), Some("7"));
        assert_eq!(config.duration, Duration::from_secs(3600));
    }

    #[test]
    fn test_config_file_argument() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.toml");
        std::fs::write(&path, "duration = \"5m\"\n").unwrap();
        let args = Args::parse_from(["rteval", "-c", path.to_str().unwrap()]);
        let config = load_config(&args).unwrap();
        assert_eq!(config.duration, Duration::from_secs(300));
    }

    #[test]
    fn test_shipped_config_parses() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/default.toml");
        let config = RunConfig::from_file(&path).unwrap();
        config.validate().unwrap();
        assert_eq!(config.timing.poll_interval, Duration::from_secs(60));
        assert_eq!(config.loads.modules.len(), 3);
        assert!(config.measurement.modules.contains_key("cyclictest"));
    }

    #[test]
    fn test_invalid_cpulist() {
        assert!(resolve_cpulist("loads", Some("3-1")).is_err());
        assert!(resolve_cpulist("loads", None).unwrap().is_none());
    }
}

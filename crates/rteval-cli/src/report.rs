//! Report directory layout and the run summary.

use anyhow::{Context, Result};
use rteval_common::config::RunConfig;
use rteval_runtime::host::RtCapabilities;
use rteval_runtime::registry;
use rteval_runtime::{RunOutcome, SystemTopology};
use serde::Serialize;
use std::fmt::Write as _;
use std::fs::{self, File};
use std::io::{BufWriter, Write as _};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Written to `summary.json` in the report directory.
#[derive(Debug, Serialize)]
struct Summary<'a> {
    version: &'static str,
    host: HostSummary<'a>,
    duration: String,
    run: &'a RunOutcome,
}

#[derive(Debug, Serialize)]
struct HostSummary<'a> {
    topology: String,
    nodes: usize,
    cpus: String,
    memory_bytes: u64,
    capabilities: &'a RtCapabilities,
}

/// Create `<workdir>/rteval-<YYYYMMDD>-<n>/` with the first free `n`, and
/// its `logs/` directory when logging is enabled.
///
/// # Errors
///
/// Returns an error if a directory cannot be created.
pub fn create_report_dir(workdir: &Path, logging: bool) -> Result<PathBuf> {
    create_report_dir_on(workdir, &today(), logging)
}

fn today() -> String {
    let stamp = humantime::format_rfc3339_seconds(SystemTime::now()).to_string();
    stamp[..10].replace('-', "")
}

fn create_report_dir_on(workdir: &Path, date: &str, logging: bool) -> Result<PathBuf> {
    fs::create_dir_all(workdir).with_context(|| format!("Failed to create {}", workdir.display()))?;

    let mut n = 1u32;
    let dir = loop {
        let candidate = workdir.join(format!("rteval-{date}-{n}"));
        match fs::create_dir(&candidate) {
            Ok(()) => break candidate,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => n += 1,
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to create {}", candidate.display()));
            }
        }
    };

    if logging {
        let logs = dir.join("logs");
        fs::create_dir(&logs).with_context(|| format!("Failed to create {}", logs.display()))?;
    }
    Ok(dir)
}

/// Write `summary.json` and the effective configuration into `reportdir`.
///
/// # Errors
///
/// Returns an error if serialization or writing fails.
pub fn write_summary(
    reportdir: &Path,
    config: &RunConfig,
    topology: &SystemTopology,
    capabilities: &RtCapabilities,
    outcome: &RunOutcome,
) -> Result<PathBuf> {
    let summary = Summary {
        version: env!("CARGO_PKG_VERSION"),
        host: HostSummary {
            topology: topology.to_string(),
            nodes: topology.node_count(),
            cpus: topology.all_cpus().collapse(),
            memory_bytes: topology.total_memory(),
            capabilities,
        },
        duration: humantime::format_duration(config.duration).to_string(),
        run: outcome,
    };

    let path = reportdir.join("summary.json");
    let file = File::create(&path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, &summary).context("Failed to serialize summary")?;
    writer.write_all(b"\n")?;
    writer.flush()?;

    let config_path = reportdir.join("rteval.toml");
    let toml = config.to_toml().context("Failed to serialize configuration")?;
    fs::write(&config_path, toml).with_context(|| format!("Failed to write {}", config_path.display()))?;

    Ok(path)
}

/// Human readable list of every registered module and its options.
pub fn module_listing() -> String {
    let mut out = String::new();
    for entry in registry::entries() {
        let _ = writeln!(out, "{} ({})", entry.name, entry.kind);
        for param in entry.parameters {
            let default = param.default.map(|d| format!(" [default: {d}]")).unwrap_or_default();
            let _ = writeln!(
                out,
                "    {}={:<10} {}{}",
                param.name, param.metavar, param.description, default
            );
        }
    }
    out
}

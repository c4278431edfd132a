//! Host probes: real-time capabilities, tool lookup and load average.
//!
//! Nothing here changes host state. The harness measures the scheduler, it
//! does not configure it, so a missing capability is a warning.

use rteval_common::error::{RtevalError, RtevalResult};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Information about real-time capabilities of the system.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RtCapabilities {
    /// Whether running as root.
    pub is_root: bool,
    /// `RLIMIT_RTPRIO` value (max RT priority allowed).
    pub rtprio_limit: Option<u64>,
    /// Whether running on a `PREEMPT_RT` kernel.
    pub preempt_rt: bool,
    /// Kernel release string (`uname -r`).
    pub kernel_release: Option<String>,
}

impl RtCapabilities {
    /// Check if SCHED_FIFO measurement threads are likely to start.
    #[must_use]
    pub fn can_use_rt_scheduling(&self) -> bool {
        self.is_root || self.rtprio_limit.is_some_and(|l| l > 0)
    }
}

/// Probe the current process and kernel.
#[cfg(target_os = "linux")]
#[allow(unsafe_code)]
#[must_use]
pub fn check_rt_capabilities() -> RtCapabilities {
    // SAFETY: geteuid has no preconditions
    let is_root = unsafe { libc::geteuid() } == 0;

    let mut rlim = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: rlim is a valid, writable rlimit
    let rtprio_limit = if unsafe { libc::getrlimit(libc::RLIMIT_RTPRIO, &mut rlim) } == 0 {
        Some(rlim.rlim_cur)
    } else {
        None
    };

    let preempt_rt = fs::read_to_string("/proc/version")
        .map(|v| v.contains("PREEMPT_RT") || v.contains("PREEMPT RT"))
        .unwrap_or(false);

    RtCapabilities {
        is_root,
        rtprio_limit,
        preempt_rt,
        kernel_release: kernel_release(),
    }
}

#[cfg(not(target_os = "linux"))]
#[must_use]
pub fn check_rt_capabilities() -> RtCapabilities {
    RtCapabilities::default()
}

/// Log what the host offers before a run starts.
pub fn preflight() -> RtCapabilities {
    let caps = check_rt_capabilities();

    if !caps.preempt_rt {
        warn!(
            kernel = caps.kernel_release.as_deref().unwrap_or("unknown"),
            "PREEMPT_RT kernel not detected, latencies will reflect a stock kernel"
        );
    }
    if !caps.can_use_rt_scheduling() {
        warn!(
            rtprio_limit = ?caps.rtprio_limit,
            "Cannot use RT scheduling: run as root or raise RLIMIT_RTPRIO"
        );
    }

    info!(?caps, "Host capabilities");
    caps
}

/// Kernel release from procfs.
#[must_use]
pub fn kernel_release() -> Option<String> {
    fs::read_to_string("/proc/sys/kernel/osrelease")
        .ok()
        .map(|s| s.trim().to_string())
}

/// Locate an executable on `PATH`.
#[must_use]
pub fn find_executable(name: &str) -> Option<PathBuf> {
    let path = env::var_os("PATH")?;
    find_in(name, env::split_paths(&path))
}

fn find_in(name: &str, dirs: impl Iterator<Item = PathBuf>) -> Option<PathBuf> {
    dirs.map(|dir| dir.join(name)).find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path).is_ok_and(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// One-minute load average from a `loadavg`-formatted file.
///
/// # Errors
///
/// Returns [`RtevalError::Io`] if the file cannot be read or does not
/// start with a number.
pub fn read_load_average(path: &Path) -> RtevalResult<f64> {
    let content = fs::read_to_string(path).map_err(|e| RtevalError::io(path.display(), &e))?;
    content
        .split_whitespace()
        .next()
        .and_then(|first| first.parse::<f64>().ok())
        .ok_or_else(|| RtevalError::Io(format!("{}: malformed load average", path.display())))
}

//! External work units: spawning, polling and terminating child processes.
//!
//! Every unit runs in its own process group so that shell-wrapped commands
//! (`sh -c "taskset ... make ..."`) are signalled as a whole.

use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use rteval_common::error::{RtevalError, RtevalResult};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const TERMINATE_POLL: Duration = Duration::from_millis(20);

/// How a work unit ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitExit {
    /// Exit status 0.
    Clean,
    /// Terminated by SIGINT or SIGTERM.
    Stopped,
    /// Killed by the OOM killer, or could not be spawned for lack of memory.
    OutOfMemory,
    /// Anything else; the description is suitable for an error message.
    Failed(String),
}

impl UnitExit {
    /// Classify a POSIX exit status.
    #[must_use]
    pub fn classify(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return if code == 0 {
                Self::Clean
            } else {
                Self::Failed(format!("returned {code}"))
            };
        }
        match status.signal() {
            Some(libc::SIGINT | libc::SIGTERM) => Self::Stopped,
            Some(libc::SIGKILL) => Self::OutOfMemory,
            Some(signal) => Self::Failed(format!("killed by signal {signal}")),
            None => Self::Failed(format!("unknown status {status}")),
        }
    }
}

/// Result of a spawn attempt that did not fail fatally.
#[derive(Debug)]
pub enum Spawned {
    /// The unit is running.
    Started(WorkUnit),
    /// The kernel refused to create the process (ENOMEM/EAGAIN).
    OutOfMemory,
}

/// Standard I/O set for a module's work units.
///
/// stdin is always `/dev/null`; stdout/stderr go to `<name>.stdout` and
/// `<name>.stderr` in the log directory when logging is on, `/dev/null`
/// otherwise.
#[derive(Debug)]
pub struct UnitIo {
    stdout: Option<File>,
    stderr: Option<File>,
}

impl UnitIo {
    /// Discard all output.
    #[must_use]
    pub fn null() -> Self {
        Self {
            stdout: None,
            stderr: None,
        }
    }

    /// Open log files for `name` below `logdir`, or discard output if
    /// `logdir` is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`RtevalError::Io`] if the directory or files cannot be created.
    pub fn open(logdir: Option<&Path>, name: &str) -> RtevalResult<Self> {
        let Some(dir) = logdir else {
            return Ok(Self::null());
        };
        fs::create_dir_all(dir).map_err(|e| RtevalError::io(dir.display(), &e))?;

        let open = |suffix: &str| {
            let path = dir.join(format!("{name}.{suffix}"));
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|e| RtevalError::io(path.display(), &e))
        };

        Ok(Self {
            stdout: Some(open("stdout")?),
            stderr: Some(open("stderr")?),
        })
    }

    fn stdio(file: Option<&File>) -> io::Result<Stdio> {
        match file {
            Some(f) => Ok(Stdio::from(f.try_clone()?)),
            None => Ok(Stdio::null()),
        }
    }

    fn attach(&self, cmd: &mut Command) -> io::Result<()> {
        cmd.stdin(Stdio::null())
            .stdout(Self::stdio(self.stdout.as_ref())?)
            .stderr(Self::stdio(self.stderr.as_ref())?);
        Ok(())
    }
}

/// One running external process owned by a module.
#[derive(Debug)]
pub struct WorkUnit {
    label: String,
    child: Child,
    exit: Option<UnitExit>,
}

impl WorkUnit {
    /// Spawn `cmd` in a new process group with `io` attached.
    ///
    /// # Errors
    ///
    /// Returns [`RtevalError::ModuleFailure`] when the program cannot be
    /// started for reasons other than memory pressure.
    pub fn spawn(module: &str, label: &str, mut cmd: Command, io: &UnitIo) -> RtevalResult<Spawned> {
        io.attach(&mut cmd)
            .map_err(|e| RtevalError::io(format!("{module}: stdio"), &e))?;
        cmd.process_group(0);

        debug!(module, unit = label, command = ?cmd, "Starting work unit");
        match cmd.spawn() {
            Ok(child) => Ok(Spawned::Started(Self {
                label: label.to_string(),
                child,
                exit: None,
            })),
            Err(e) if is_resource_exhaustion(&e) => {
                debug!(module, unit = label, error = %e, "Spawn failed for lack of memory");
                Ok(Spawned::OutOfMemory)
            }
            Err(e) => Err(RtevalError::ModuleFailure {
                module: module.to_string(),
                status: format!("failed to start {label}: {e}"),
            }),
        }
    }

    /// Label used in logs (`node0`, `global`, ...).
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Process id.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Non-blocking check; `None` while the unit runs.
    ///
    /// # Errors
    ///
    /// Returns [`RtevalError::Io`] if the status cannot be queried.
    pub fn poll(&mut self) -> RtevalResult<Option<UnitExit>> {
        if let Some(exit) = &self.exit {
            return Ok(Some(exit.clone()));
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                let exit = UnitExit::classify(status);
                debug!(unit = %self.label, ?exit, "Work unit exited");
                self.exit = Some(exit.clone());
                Ok(Some(exit))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(RtevalError::io(format!("wait for {}", self.label), &e)),
        }
    }

    /// Whether the unit is still running.
    pub fn is_running(&mut self) -> bool {
        matches!(self.poll(), Ok(None))
    }

    /// Send `signal` to the unit's process group, then SIGKILL it if it has
    /// not exited after `grace`. Always reaps the process.
    pub fn terminate(&mut self, signal: Signal, grace: Duration) -> Option<UnitExit> {
        if !self.is_running() {
            return self.exit.clone();
        }

        self.signal_group(signal);
        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            if !self.is_running() {
                return self.exit.clone();
            }
            thread::sleep(TERMINATE_POLL);
        }

        warn!(unit = %self.label, pid = self.pid(), ?signal, "Work unit ignored stop signal, killing");
        self.signal_group(Signal::SIGKILL);
        match self.child.wait() {
            Ok(status) => {
                let exit = UnitExit::classify(status);
                self.exit = Some(exit.clone());
                Some(exit)
            }
            Err(e) => {
                warn!(unit = %self.label, error = %e, "Failed to reap work unit");
                None
            }
        }
    }

    fn signal_group(&mut self, signal: Signal) {
        let sent = i32::try_from(self.child.id())
            .map_err(|_| Errno::EINVAL)
            .and_then(|pid| killpg(Pid::from_raw(pid), signal));
        if let Err(e) = sent {
            debug!(unit = %self.label, error = %e, "killpg failed, signalling the child only");
            if signal == Signal::SIGKILL {
                let _ = self.child.kill();
            }
        }
    }
}

impl Drop for WorkUnit {
    fn drop(&mut self) {
        if self.is_running() {
            self.signal_group(Signal::SIGKILL);
            let _ = self.child.wait();
        }
    }
}

/// Run a preparation command to completion (tar, make mrproper, ...).
///
/// # Errors
///
/// Returns [`RtevalError::ModuleBuild`] if the command cannot be started.
pub fn run_to_completion(module: &str, mut cmd: Command, io: &UnitIo) -> RtevalResult<ExitStatus> {
    let build_err = |reason: String| RtevalError::ModuleBuild {
        module: module.to_string(),
        reason,
    };
    io.attach(&mut cmd)
        .map_err(|e| build_err(format!("stdio: {e}")))?;
    debug!(module, command = ?cmd, "Running");
    cmd.status().map_err(|e| build_err(format!("{cmd:?}: {e}")))
}

fn is_resource_exhaustion(e: &io::Error) -> bool {
    matches!(e.raw_os_error(), Some(libc::ENOMEM | libc::EAGAIN))
}

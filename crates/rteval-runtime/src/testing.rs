//! Scripted stand-ins for external programs.

use std::ffi::OsString;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

static PATH_LOCK: Mutex<()> = Mutex::new(());

/// A directory of shell scripts placed in front of `PATH`.
///
/// Holds a process-wide lock so tests that replace programs do not see
/// each other's scripts. `PATH` is restored on drop.
pub(crate) struct FakeBin {
    dir: TempDir,
    saved: Option<OsString>,
    _lock: MutexGuard<'static, ()>,
}

impl FakeBin {
    pub(crate) fn new() -> Self {
        let lock = PATH_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let dir = tempfile::tempdir().unwrap();
        let saved = std::env::var_os("PATH");

        let mut paths = vec![dir.path().to_path_buf()];
        if let Some(path) = &saved {
            paths.extend(std::env::split_paths(path));
        }
        std::env::set_var("PATH", std::env::join_paths(paths).unwrap());

        Self {
            dir,
            saved,
            _lock: lock,
        }
    }

    /// Install `name` running `body` under `/bin/sh`.
    pub(crate) fn script(&self, name: &str, body: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }
}

impl Drop for FakeBin {
    fn drop(&mut self) {
        match self.saved.take() {
            Some(path) => std::env::set_var("PATH", path),
            None => std::env::remove_var("PATH"),
        }
    }
}

/// Poll `done` until it holds, failing the test after ten seconds.
pub(crate) fn wait_until(mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !done() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(10));
    }
}

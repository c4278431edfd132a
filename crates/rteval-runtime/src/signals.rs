//! Cooperative stop handling.
//!
//! A [`StopToken`] is the cancellation flag handed to every module driver
//! and to the run loop. While a [`SignalGuard`] is alive, SIGINT and
//! SIGTERM only set a process-wide atomic; a forwarder thread copies it
//! into the token. Dropping the guard restores the default dispositions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Written by the signal handlers, drained by the forwarder thread.
static STOP_SIGNALLED: AtomicBool = AtomicBool::new(false);

const FORWARD_POLL: Duration = Duration::from_millis(10);
const WAIT_POLL: Duration = Duration::from_millis(20);

/// Shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct StopToken(Arc<AtomicBool>);

impl StopToken {
    /// Create an unset token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop (can be called from any thread).
    pub fn request_stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Check if a stop has been requested.
    #[inline]
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// RAII installation of the SIGINT/SIGTERM handlers.
pub struct SignalGuard {
    done: Arc<AtomicBool>,
    received: Arc<AtomicBool>,
    forwarder: Option<JoinHandle<()>>,
}

impl SignalGuard {
    /// Route SIGINT and SIGTERM into `token` until the guard is dropped.
    #[must_use]
    pub fn install(token: &StopToken) -> Self {
        STOP_SIGNALLED.store(false, Ordering::SeqCst);

        let done = Arc::new(AtomicBool::new(false));
        let received = Arc::new(AtomicBool::new(false));

        let forwarder = {
            let done = Arc::clone(&done);
            let received = Arc::clone(&received);
            let token = token.clone();
            thread::Builder::new()
                .name("rteval-signals".into())
                .spawn(move || {
                    while !done.load(Ordering::Acquire) {
                        if STOP_SIGNALLED.swap(false, Ordering::SeqCst) {
                            info!("Stop signal received");
                            received.store(true, Ordering::Release);
                            token.request_stop();
                        }
                        thread::sleep(FORWARD_POLL);
                    }
                })
        };
        let forwarder = match forwarder {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(error = %e, "Failed to spawn signal forwarder, signals will not stop the run");
                None
            }
        };

        if forwarder.is_some() {
            set_handlers(stop_handler as libc::sighandler_t);
            debug!("SIGINT/SIGTERM handlers installed");
        }

        Self {
            done,
            received,
            forwarder,
        }
    }

    /// Whether a signal arrived while the guard was installed.
    #[must_use]
    pub fn signal_received(&self) -> bool {
        self.received.load(Ordering::Acquire)
    }
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.forwarder.take() {
            set_handlers(libc::SIG_DFL);
            self.done.store(true, Ordering::Release);
            let _ = handle.join();
            debug!("Default signal handling restored");
        }
    }
}

extern "C" fn stop_handler(_: libc::c_int) {
    STOP_SIGNALLED.store(true, Ordering::SeqCst);
}

#[allow(unsafe_code)]
fn set_handlers(handler: libc::sighandler_t) {
    for signal in [libc::SIGINT, libc::SIGTERM] {
        // SAFETY: the handler only touches an atomic, which is async-signal-safe
        unsafe {
            libc::signal(signal, handler);
        }
    }
}

/// Sleep for up to `timeout`, returning early once `token` is set.
///
/// # Returns
///
/// `true` if a stop was requested, `false` if the timeout expired.
pub fn wait_for_stop(token: &StopToken, timeout: Duration) -> bool {
    let start = Instant::now();

    loop {
        if token.is_stopped() {
            return true;
        }
        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return false;
        }
        thread::sleep(WAIT_POLL.min(timeout - elapsed));
    }
}

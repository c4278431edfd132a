//! The supervising run loop.
//!
//! Each measurement profile runs in turn:
//! 1. Start the loads (if the profile measures under load) and the profile
//! 2. Settle, then unleash loads and measurements together
//! 3. Poll until the deadline, a stop request, or the profile ending early
//! 4. Tear down measurements before loads, then finalize the measurements
//!
//! Teardown happens on every path, including errors.

use crate::load_manager::LoadModules;
use crate::measurement::{MeasurementModules, MeasurementProfile};
use crate::module::ModuleReport;
use crate::signals::{wait_for_stop, SignalGuard, StopToken};
use rteval_common::config::{RunConfig, TimingConfig};
use rteval_common::error::RtevalResult;
use serde::Serialize;
use std::time::{Duration, Instant, SystemTime};
use tracing::{info, info_span, warn};

/// Why measuring ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The full duration elapsed.
    Completed,
    /// The measurement modules ended before the deadline.
    EarlyCompletion,
    /// The stop token was set (SIGINT/SIGTERM or a caller).
    Signal,
}

/// Outcome of one measurement profile.
#[derive(Debug, Clone, Serialize)]
pub struct ProfileOutcome {
    /// Loads ran alongside.
    pub with_loads: bool,
    /// Modules ran in parallel.
    pub run_parallel: bool,
    /// Measurement modules of the profile.
    pub modules: Vec<String>,
    /// Wall-clock start of measuring (RFC 3339), if it was reached.
    pub measure_start: Option<String>,
    /// Why measuring ended.
    pub stop_reason: StopReason,
    /// Time spent measuring, in seconds.
    pub elapsed_secs: f64,
    /// Status reports logged while measuring.
    pub status_reports: u32,
    /// Mean load average over the profile.
    pub load_average: Option<f64>,
    /// Load module reports.
    pub loads: Vec<ModuleReport>,
    /// Measurement module reports.
    pub measurements: Vec<ModuleReport>,
}

/// Outcome of a whole run, handed to reporting.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    /// Per-profile outcomes in run order.
    pub profiles: Vec<ProfileOutcome>,
    /// Wall-clock start of the first measurement.
    pub measure_start: Option<String>,
    /// Overall stop reason: a stop request wins over an early stop.
    pub stop_reason: StopReason,
    /// Some profile ended before its deadline. Sticky across profiles.
    pub early_stop: bool,
    /// The run was stopped through the stop token.
    pub interrupted: bool,
}

impl RunOutcome {
    /// Outcome of `profiles`; `interrupted` when the stop token was set.
    #[must_use]
    pub fn new(profiles: Vec<ProfileOutcome>, interrupted: bool) -> Self {
        let early_stop = profiles
            .iter()
            .any(|p| p.stop_reason == StopReason::EarlyCompletion);
        let stop_reason = if interrupted {
            StopReason::Signal
        } else if early_stop {
            StopReason::EarlyCompletion
        } else {
            StopReason::Completed
        };
        Self {
            measure_start: profiles.iter().find_map(|p| p.measure_start.clone()),
            profiles,
            stop_reason,
            early_stop,
            interrupted,
        }
    }

    /// Whether any profile ended before its deadline.
    #[must_use]
    pub fn early_stop(&self) -> bool {
        self.early_stop
    }

    /// Whether the run was stopped through the stop token.
    #[must_use]
    pub fn stopped_by_signal(&self) -> bool {
        self.interrupted
    }

    /// Process exit status: 1 after an early stop, 0 otherwise.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        i32::from(self.early_stop)
    }
}

/// Timing state of the profile being measured.
struct RunWindow {
    started: Instant,
    deadline: Instant,
    next_report: Option<Instant>,
    ticks: u64,
    status_reports: u32,
}

impl RunWindow {
    fn open(duration: Duration, report_interval: Duration) -> Self {
        let started = Instant::now();
        Self {
            started,
            deadline: started + duration,
            next_report: (!report_interval.is_zero()).then(|| started + report_interval),
            ticks: 0,
            status_reports: 0,
        }
    }

    fn remaining(&self, now: Instant) -> Duration {
        self.deadline.saturating_duration_since(now)
    }
}

/// Drives every measurement profile for the configured duration.
pub struct RunLoop {
    duration: Duration,
    report_interval: Duration,
    timing: TimingConfig,
    stop: StopToken,
    handle_signals: bool,
}

impl RunLoop {
    /// Run loop for `config`; `stop` ends the run early.
    #[must_use]
    pub fn new(config: &RunConfig, stop: StopToken) -> Self {
        Self {
            duration: config.duration,
            report_interval: config.report_interval,
            timing: config.timing.clone(),
            stop,
            handle_signals: true,
        }
    }

    /// Route SIGINT/SIGTERM into the stop token while measuring (default on).
    #[must_use]
    pub fn handle_signals(mut self, enabled: bool) -> Self {
        self.handle_signals = enabled;
        self
    }

    /// The run's stop token.
    #[must_use]
    pub fn stop_token(&self) -> &StopToken {
        &self.stop
    }

    /// Run all profiles of `measurements`.
    ///
    /// `make_loads` is called once per profile that measures under load and
    /// must return configured load modules.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error of a profile once it has been torn
    /// down. Errors raised after a stop request are logged and dropped.
    pub fn run<F>(&self, mut measurements: MeasurementModules, mut make_loads: F) -> RtevalResult<RunOutcome>
    where
        F: FnMut() -> RtevalResult<LoadModules>,
    {
        let mut profiles = Vec::new();

        for profile in measurements.profiles_mut() {
            if self.stop.is_stopped() {
                break;
            }
            if profile.active_count() == 0 {
                warn!(modules = ?profile.module_names(), "No measurement module left to run, skipping profile");
                continue;
            }

            let span = info_span!("profile", with_loads = profile.with_loads(), parallel = profile.run_parallel());
            let _enter = span.enter();

            profiles.push(self.run_profile(profile, &mut make_loads)?);
        }

        let outcome = RunOutcome::new(profiles, self.stop.is_stopped());
        info!(
            profiles = outcome.profiles.len(),
            stop_reason = ?outcome.stop_reason,
            early_stop = outcome.early_stop,
            "Run finished"
        );
        Ok(outcome)
    }

    fn run_profile<F>(&self, profile: &mut MeasurementProfile, make_loads: &mut F) -> RtevalResult<ProfileOutcome>
    where
        F: FnMut() -> RtevalResult<LoadModules>,
    {
        let mut loads = if profile.with_loads() { Some(make_loads()?) } else { None };
        let mut outcome = ProfileOutcome {
            with_loads: profile.with_loads(),
            run_parallel: profile.run_parallel(),
            modules: profile.module_names(),
            measure_start: None,
            stop_reason: StopReason::Signal,
            elapsed_secs: 0.0,
            status_reports: 0,
            load_average: None,
            loads: Vec::new(),
            measurements: Vec::new(),
        };

        let result = self.measure(profile, loads.as_mut(), &mut outcome);

        // measurements first, then the loads they ran under
        profile.stop();
        if let Some(loads) = loads.as_mut() {
            loads.stop();
            outcome.load_average = loads.load_average();
        }

        match result {
            Ok(reason) => outcome.stop_reason = reason,
            Err(e) if self.stop.is_stopped() => {
                warn!(error = %e, "Error after stop request, ignoring");
                outcome.stop_reason = StopReason::Signal;
            }
            Err(e) => return Err(e),
        }

        if let Err(e) = profile.wait_for_completion() {
            if !self.stop.is_stopped() {
                return Err(e);
            }
            warn!(error = %e, "Finalize failed after stop request");
        }

        if let Some(loads) = loads.as_ref() {
            outcome.loads = loads.reports();
        }
        outcome.measurements = profile.reports();
        Ok(outcome)
    }

    fn measure(
        &self,
        profile: &mut MeasurementProfile,
        mut loads: Option<&mut LoadModules>,
        outcome: &mut ProfileOutcome,
    ) -> RtevalResult<StopReason> {
        if let Some(loads) = loads.as_deref_mut() {
            loads.start()?;
        }
        profile.start()?;

        let _guard = self.handle_signals.then(|| SignalGuard::install(&self.stop));

        if !self.timing.settle.is_zero() {
            info!(settle = %humantime::format_duration(self.timing.settle), "Letting the system settle");
            if wait_for_stop(&self.stop, self.timing.settle) {
                return Ok(StopReason::Signal);
            }
        }

        if let Some(loads) = loads.as_deref_mut() {
            loads.unleash();
        }
        profile.unleash();
        outcome.measure_start = Some(humantime::format_rfc3339_seconds(SystemTime::now()).to_string());
        info!(
            duration = %humantime::format_duration(self.duration),
            loads = loads.as_deref().map_or(0, LoadModules::modules_loaded),
            "Measurement started"
        );

        let mut window = RunWindow::open(self.duration, self.report_interval);
        let reason = self.poll(profile, loads, &mut window);
        outcome.elapsed_secs = window.started.elapsed().as_secs_f64();
        outcome.status_reports = window.status_reports;
        reason
    }

    fn poll(
        &self,
        profile: &MeasurementProfile,
        mut loads: Option<&mut LoadModules>,
        window: &mut RunWindow,
    ) -> RtevalResult<StopReason> {
        loop {
            let now = Instant::now();
            if now >= window.deadline {
                info!("Measurement duration reached");
                return Ok(StopReason::Completed);
            }
            let sleep = self.timing.poll_interval.min(window.remaining(now));
            if wait_for_stop(&self.stop, sleep) {
                info!("Stop requested, ending measurement");
                return Ok(StopReason::Signal);
            }
            window.ticks += 1;

            if let Some(loads) = loads.as_deref_mut() {
                loads.check_liveness()?;
                if window.ticks % u64::from(self.timing.loadavg_every.max(1)) == 0 {
                    loads.sample_load_average();
                }
            }

            if let Some(err) = profile.failure() {
                return Err(err);
            }
            if !profile.is_alive() {
                warn!(
                    elapsed = %humantime::format_duration(Duration::from_secs(window.started.elapsed().as_secs())),
                    "Measurement modules stopped early"
                );
                return Ok(StopReason::EarlyCompletion);
            }

            let now = Instant::now();
            if let Some(next) = window.next_report {
                if now >= next && now < window.deadline {
                    window.status_reports += 1;
                    window.next_report = Some(next + self.report_interval);
                    let left = Duration::from_secs(window.remaining(now).as_secs());
                    info!(
                        remaining = %humantime::format_duration(left),
                        load_average = ?loads.as_deref().and_then(LoadModules::load_average),
                        "Measurement in progress"
                    );
                }
            }
        }
    }
}

//! kcompile: parallel kernel builds, one build job per NUMA node.

use super::{node_placement, Binder};
use crate::backoff::OomBackoff;
use crate::module::{Module, ModuleKind, SetupContext, SetupOutcome, TaskContext};
use crate::process::{run_to_completion, Spawned, UnitExit, UnitIo, WorkUnit};
use nix::sys::signal::Signal;
use rteval_common::error::{RtevalError, RtevalResult};
use rteval_common::params::{ModuleParams, ParamSpec};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Registry name.
pub const NAME: &str = "kcompile";

/// Recognized options.
pub const PARAMETERS: &[ParamSpec] = &[
    ParamSpec {
        name: "source",
        description: "Source tar ball",
        default: Some("linux-5.1.tar.xz"),
        metavar: "TARBALL",
    },
    ParamSpec {
        name: "jobspercore",
        description: "Number of working threads per core",
        default: Some("2"),
        metavar: "NUM",
    },
];

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Make jobs per CPU for a node with `mem_bytes` of memory and
/// `node_cpus` CPUs.
///
/// The memory/core ratio is floored at 1 GB. Nodes with more than 2 GB
/// per core use one job per GB, others `jobspercore` per GB.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn calc_jobs_per_cpu(mem_bytes: u64, node_cpus: usize, jobspercore: usize) -> usize {
    let ratio = (mem_bytes as f64 / GIB / node_cpus.max(1) as f64).max(1.0);
    let mult = if ratio > 2.0 { 1 } else { jobspercore };
    ((ratio.floor() as usize) * mult).max(1)
}

/// A kernel build bound to one node.
#[derive(Debug)]
pub struct BuildJob {
    node: u32,
    jobs: usize,
    binder: Binder,
    kdir: PathBuf,
    objdir: PathBuf,
    unit: Option<WorkUnit>,
    started_at: Option<Instant>,
}

impl BuildJob {
    fn new(node: u32, jobs: usize, binder: Binder, kdir: &Path, builddir: &Path) -> Self {
        Self {
            node,
            jobs,
            binder,
            kdir: kdir.to_path_buf(),
            objdir: builddir.join(format!("node{node}")),
            unit: None,
            started_at: None,
        }
    }

    /// Owning node.
    #[must_use]
    pub fn node(&self) -> u32 {
        self.node
    }

    /// Make job count.
    #[must_use]
    pub fn jobs(&self) -> usize {
        self.jobs
    }

    fn make(&self, targets: &[String]) -> String {
        let mut argv = self.binder.argv();
        argv.push("make".into());
        argv.push(format!("O={}", self.objdir.display()));
        argv.push("-C".into());
        argv.push(self.kdir.display().to_string());
        argv.extend(targets.iter().cloned());
        argv.join(" ")
    }

    /// Shell command building the kernel.
    #[must_use]
    pub fn run_command(&self) -> String {
        self.make(&[
            format!("-j{}", self.jobs),
            "bzImage".into(),
            "modules".into(),
        ])
    }

    /// Shell command resetting the object directory.
    #[must_use]
    pub fn clean_command(&self) -> String {
        self.make(&["clean".into(), "allmodconfig".into()])
    }

    fn shell(script: String) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    fn is_running(&mut self) -> bool {
        self.unit.as_mut().is_some_and(WorkUnit::is_running)
    }
}

/// kcompile load module.
pub struct Kcompile {
    params: ModuleParams,
    tarball: PathBuf,
    builddir: PathBuf,
    kdir: PathBuf,
    jobs: Vec<BuildJob>,
    logdir: Option<PathBuf>,
    io: Option<UnitIo>,
    backoff: OomBackoff,
    grace: Duration,
    builds: u64,
}

impl Kcompile {
    /// Create the module with its configured parameters.
    pub fn new(mut params: ModuleParams) -> Self {
        params.apply_defaults(PARAMETERS);
        Self {
            params,
            tarball: PathBuf::new(),
            builddir: PathBuf::new(),
            kdir: PathBuf::new(),
            jobs: Vec::new(),
            logdir: None,
            io: None,
            backoff: OomBackoff::new(Duration::from_secs(5), Duration::from_secs(60)),
            grace: Duration::from_secs(2),
            builds: 0,
        }
    }

    /// Boxed constructor for the registry.
    pub fn create(params: ModuleParams) -> Box<dyn Module> {
        Box::new(Self::new(params))
    }

    /// Per-node build jobs, available after setup.
    #[must_use]
    pub fn build_jobs(&self) -> &[BuildJob] {
        &self.jobs
    }

    fn find_tarball(&self, srcdir: &Path) -> RtevalResult<PathBuf> {
        let source = self.params.get_str("source").unwrap_or_default();
        let named = srcdir.join(&source);
        if named.is_file() {
            return Ok(named);
        }

        let entries = fs::read_dir(srcdir).map_err(|e| {
            RtevalError::config(NAME, format!("cannot read {}: {e}", srcdir.display()))
        })?;
        let mut candidates: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("linux-") && n.contains(".tar"))
            })
            .collect();
        candidates.sort();
        candidates.into_iter().next().ok_or_else(|| {
            RtevalError::config(
                NAME,
                format!("no kernel tarballs found in {}", srcdir.display()),
            )
        })
    }

    fn extract(&self, io: &UnitIo) -> RtevalResult<()> {
        debug!(tarball = %self.tarball.display(), "Unpacking kernel tarball");
        let mut tar = Command::new("tar");
        tar.arg("-C").arg(&self.builddir).arg("-x");
        let name = self.tarball.to_string_lossy();
        if name.ends_with(".bz2") {
            tar.arg("-j");
        } else if name.ends_with(".gz") {
            tar.arg("-z");
        } else if name.ends_with(".xz") {
            tar.arg("-J");
        }
        tar.arg("-f").arg(&self.tarball);

        let status = run_to_completion(NAME, tar, io)?;
        if !status.success() {
            return Err(build_error(format!("untar of {} failed ({status})", self.tarball.display())));
        }
        if !self.kdir.is_dir() {
            return Err(build_error(format!(
                "Can't find kernel directory {}",
                self.kdir.display()
            )));
        }
        Ok(())
    }

    fn remove_build_dirs(&self) -> RtevalResult<()> {
        debug!(builddir = %self.builddir.display(), "Removing kcompile directories");
        let mut dirs = vec![self.kdir.clone()];
        dirs.extend(self.jobs.iter().map(|job| job.objdir.clone()));
        for dir in dirs.iter().filter(|d| d.exists()) {
            fs::remove_dir_all(dir)
                .map_err(|e| build_error(format!("error removing {}: {e}", dir.display())))?;
        }
        Ok(())
    }

    fn mrproper(&self, io: &UnitIo) -> RtevalResult<bool> {
        let mut cmd = Command::new("make");
        cmd.arg("-C").arg(&self.kdir).arg("mrproper");
        Ok(run_to_completion(NAME, cmd, io)?.success())
    }

    fn start_job(&mut self, idx: usize, ctx: &TaskContext<'_>) -> RtevalResult<()> {
        if !self.backoff.ready(ctx.now) {
            return Ok(());
        }
        let io = self.io.get_or_insert_with(UnitIo::null);
        let job = &mut self.jobs[idx];
        info!(node = job.node, "Starting load");
        let label = format!("node{}", job.node);
        match WorkUnit::spawn(NAME, &label, BuildJob::shell(job.run_command()), io)? {
            Spawned::Started(unit) => {
                job.unit = Some(unit);
                job.started_at = Some(ctx.now);
                self.builds += 1;
            }
            Spawned::OutOfMemory => {
                let delay = self.backoff.record_failure(ctx.now);
                debug!(node = job.node, ?delay, "Out of memory, backing off");
            }
        }
        Ok(())
    }
}

fn build_error(reason: String) -> RtevalError {
    RtevalError::ModuleBuild {
        module: NAME.into(),
        reason,
    }
}

/// Directory a tarball unpacks to (`linux-5.1.tar.xz` -> `linux-5.1`).
fn kernel_dir_name(tarball: &Path) -> String {
    let name = tarball
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match name.find(".tar") {
        Some(pos) => name[..pos].to_string(),
        None => name,
    }
}

impl Module for Kcompile {
    fn name(&self) -> &str {
        NAME
    }

    fn kind(&self) -> ModuleKind {
        ModuleKind::Load
    }

    fn setup(&mut self, ctx: &SetupContext<'_>) -> RtevalResult<SetupOutcome> {
        let jobspercore: usize = self.params.get_or(NAME, "jobspercore", 2)?;
        self.tarball = self.find_tarball(&ctx.shared.srcdir)?;
        self.builddir = ctx.shared.builddir.clone();
        self.kdir = self.builddir.join(kernel_dir_name(&self.tarball));
        debug!(kdir = %self.kdir.display(), topology = %ctx.topology, "Kernel tree");

        let placement = node_placement(NAME, ctx.topology, ctx.cpulist);
        if placement.is_empty() {
            return Ok(SetupOutcome::DoNotRun("no CPUs available".into()));
        }

        let restricted = ctx.cpulist.is_some();
        self.jobs = placement
            .iter()
            .map(|(&node, cpus)| {
                let node_info = ctx.topology.node(node);
                let mem = node_info.map_or(0, |n| n.mem_total());
                let node_cpus = node_info.map_or(cpus.len(), |n| n.cpus().len());
                let jobs = calc_jobs_per_cpu(mem, node_cpus, jobspercore) * cpus.len();
                let binder = Binder::for_node(node, cpus, restricted, ctx.has_numactl);
                let job = BuildJob::new(node, jobs, binder, &self.kdir, &self.builddir);
                debug!(node, jobs, command = %job.run_command(), "Configured build job");
                job
            })
            .collect();

        self.logdir = ctx.shared.logdir();
        self.backoff = OomBackoff::new(ctx.timing.oom_initial_backoff, ctx.timing.oom_max_backoff);
        self.grace = ctx.timing.stop_grace;
        Ok(SetupOutcome::Run)
    }

    fn build(&mut self) -> RtevalResult<()> {
        fs::create_dir_all(&self.builddir)
            .map_err(|e| build_error(format!("{}: {e}", self.builddir.display())))?;
        let io = UnitIo::open(self.logdir.as_deref(), "kcompile-build")?;

        if !self.kdir.is_dir() {
            self.extract(&io)?;
        }

        if !self.mrproper(&io)? {
            debug!("Invalid state in kernel build tree, reloading");
            self.remove_build_dirs()?;
            self.extract(&io)?;
            if !self.mrproper(&io)? {
                return Err(build_error("kcompile setup failed: make mrproper".into()));
            }
        }

        let null = UnitIo::null();
        for job in &self.jobs {
            fs::create_dir_all(&job.objdir)
                .map_err(|e| build_error(format!("{}: {e}", job.objdir.display())))?;
            let status = run_to_completion(NAME, BuildJob::shell(job.clean_command()), &null)?;
            if !status.success() {
                warn!(node = job.node, %status, "Cleaning object directory failed");
            }
        }
        debug!("Ready to run");
        Ok(())
    }

    fn prepare(&mut self) -> RtevalResult<()> {
        self.io = Some(UnitIo::open(self.logdir.as_deref(), NAME)?);
        Ok(())
    }

    fn task(&mut self, ctx: &TaskContext<'_>) -> RtevalResult<()> {
        for idx in 0..self.jobs.len() {
            if ctx.stop.is_stopped() {
                return Ok(());
            }
            let exit = match self.jobs[idx].unit.as_mut() {
                None => None,
                Some(unit) => match unit.poll()? {
                    None => continue,
                    Some(exit) => Some(exit),
                },
            };
            match exit {
                Some(UnitExit::Failed(status)) => {
                    return Err(RtevalError::ModuleFailure {
                        module: NAME.into(),
                        status: format!("node{}: {status}", self.jobs[idx].node),
                    });
                }
                Some(UnitExit::OutOfMemory) => {
                    let job = &mut self.jobs[idx];
                    let ran_for = job
                        .started_at
                        .map_or(Duration::ZERO, |at| ctx.now.saturating_duration_since(at));
                    let delay = self.backoff.record_kill(ctx.now, ran_for);
                    debug!(node = job.node, ?delay, "Build killed for memory, backing off");
                    job.unit = None;
                    job.started_at = None;
                    self.start_job(idx, ctx)?;
                }
                Some(UnitExit::Clean) => {
                    self.backoff.reset();
                    self.jobs[idx].unit = None;
                    self.jobs[idx].started_at = None;
                    self.start_job(idx, ctx)?;
                }
                None | Some(UnitExit::Stopped) => {
                    self.jobs[idx].unit = None;
                    self.jobs[idx].started_at = None;
                    self.start_job(idx, ctx)?;
                }
            }
        }
        Ok(())
    }

    fn live_units(&mut self) -> usize {
        self.jobs.iter_mut().map(|job| usize::from(job.is_running())).sum()
    }

    fn is_alive(&mut self) -> bool {
        !self.jobs.is_empty() && self.jobs.iter_mut().all(BuildJob::is_running)
    }

    fn cleanup(&mut self) -> RtevalResult<()> {
        for job in &mut self.jobs {
            if let Some(mut unit) = job.unit.take() {
                debug!(node = job.node, "Stopping build job");
                unit.terminate(Signal::SIGTERM, self.grace);
            }
        }
        self.io = None;
        Ok(())
    }

    fn report(&self) -> serde_json::Value {
        serde_json::json!({
            "source": self.tarball.display().to_string(),
            "jobs": self.jobs.iter().map(|job| serde_json::json!({
                "node": job.node,
                "jobs": job.jobs,
                "binder": job.binder.to_string(),
            })).collect::<Vec<_>>(),
            "builds_started": self.builds,
            "oom_failures": self.backoff.failures(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::StopToken;
    use crate::testing::{wait_until, FakeBin};
    use crate::topology::{CpuList, NumaNode, SystemTopology};
    use rteval_common::config::TimingConfig;
    use rteval_common::params::SharedParams;
    use std::collections::BTreeMap;

    fn node(id: u32, cpus: &str, gib: u64) -> NumaNode {
        let mut meminfo = BTreeMap::new();
        meminfo.insert("MemTotal".to_string(), gib << 30);
        NumaNode::new(id, CpuList::expand(cpus).unwrap(), meminfo)
    }

    fn shared(srcdir: &Path, builddir: &Path) -> SharedParams {
        SharedParams {
            workdir: builddir.parent().unwrap().to_path_buf(),
            reportdir: None,
            builddir: builddir.to_path_buf(),
            srcdir: srcdir.to_path_buf(),
            numcores: 8,
            memsize: 32 << 30,
            numanodes: 2,
            duration: Duration::from_secs(60),
            logging: false,
        }
    }

    fn setup(
        module: &mut Kcompile,
        shared: &SharedParams,
        topo: &SystemTopology,
        cpulist: Option<&CpuList>,
    ) -> RtevalResult<SetupOutcome> {
        let timing = TimingConfig::default();
        module.setup(&SetupContext {
            shared,
            topology: topo,
            cpulist,
            timing: &timing,
            has_numactl: true,
        })
    }

    #[test]
    fn test_jobs_per_cpu() {
        // 1 GB per core, default multiplier
        assert_eq!(calc_jobs_per_cpu(4 << 30, 4, 2), 2);
        // below 1 GB per core the ratio is floored at 1
        assert_eq!(calc_jobs_per_cpu(1 << 30, 4, 2), 2);
        // 2 GB per core still uses the multiplier
        assert_eq!(calc_jobs_per_cpu(8 << 30, 4, 2), 4);
        // above 2 GB per core the multiplier drops to 1
        assert_eq!(calc_jobs_per_cpu(16 << 30, 4, 2), 4);
        assert_eq!(calc_jobs_per_cpu(0, 0, 0), 1);
    }

    #[test]
    fn test_missing_tarball_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(&src).unwrap();
        let topo = SystemTopology::from_nodes(vec![node(0, "0-3", 8)]).unwrap();

        let mut kc = Kcompile::new(ModuleParams::new());
        let err = setup(&mut kc, &shared(&src, &dir.path().join("build")), &topo, None).unwrap_err();
        assert!(err.is_module_local());
        assert!(err.to_string().contains("no kernel tarballs"));
    }

    #[test]
    fn test_jobs_per_node() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("linux-6.6.tar.gz"), b"").unwrap();
        let build = dir.path().join("build");
        let topo = SystemTopology::from_nodes(vec![node(0, "0-3", 4), node(1, "4-7", 16)]).unwrap();

        let mut kc = Kcompile::new(ModuleParams::new());
        let outcome = setup(&mut kc, &shared(&src, &build), &topo, None).unwrap();
        assert_eq!(outcome, SetupOutcome::Run);
        assert_eq!(kc.kdir, build.join("linux-6.6"));

        let jobs = kc.build_jobs();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].jobs(), 8);
        assert_eq!(jobs[1].jobs(), 16);
        assert_eq!(
            jobs[0].run_command(),
            format!(
                "numactl --cpunodebind 0 make O={} -C {} -j8 bzImage modules",
                build.join("node0").display(),
                build.join("linux-6.6").display()
            )
        );
        assert!(jobs[1].clean_command().ends_with("clean allmodconfig"));
    }

    #[test]
    fn test_cpulist_uses_taskset() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("linux-5.1.tar.xz"), b"").unwrap();
        let topo = SystemTopology::from_nodes(vec![node(0, "0-3", 4), node(1, "4-7", 4)]).unwrap();
        let allowed = CpuList::expand("2,3").unwrap();

        let mut kc = Kcompile::new(ModuleParams::new());
        setup(&mut kc, &shared(&src, &dir.path().join("build")), &topo, Some(&allowed)).unwrap();
        let jobs = kc.build_jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].jobs(), 4);
        assert!(jobs[0].run_command().starts_with("taskset -c 2,3 make"));
    }

    #[test]
    fn test_kernel_dir_name() {
        assert_eq!(kernel_dir_name(Path::new("/src/linux-5.1.tar.xz")), "linux-5.1");
        assert_eq!(kernel_dir_name(Path::new("linux-tree")), "linux-tree");
    }

    /// A one-node kcompile whose `make` runs `body`.
    fn scripted(body: &str) -> (FakeBin, tempfile::TempDir, Kcompile) {
        let bin = FakeBin::new();
        bin.script("make", body);
        let dir = tempfile::tempdir().unwrap();
        let mut kc = Kcompile::new(ModuleParams::new());
        kc.builddir = dir.path().to_path_buf();
        kc.kdir = dir.path().join("linux-6.6");
        kc.jobs = vec![BuildJob::new(0, 2, Binder::Unbound, &kc.kdir, &kc.builddir)];
        kc.prepare().unwrap();
        (bin, dir, kc)
    }

    fn task_at(kc: &mut Kcompile, stop: &StopToken, now: Instant) -> RtevalResult<()> {
        kc.task(&TaskContext { stop, now })
    }

    fn wait_for_exit(kc: &mut Kcompile) {
        wait_until(|| !kc.jobs[0].is_running());
    }

    #[test]
    fn test_finished_build_restarts() {
        let (_bin, _dir, mut kc) = scripted("exit 0");
        let stop = StopToken::new();
        let now = Instant::now();

        task_at(&mut kc, &stop, now).unwrap();
        assert_eq!(kc.builds, 1);
        wait_for_exit(&mut kc);
        task_at(&mut kc, &stop, now).unwrap();
        assert_eq!(kc.builds, 2);
        kc.cleanup().unwrap();
    }

    #[test]
    fn test_failed_build_is_fatal() {
        let (_bin, _dir, mut kc) = scripted("exit 2");
        let stop = StopToken::new();
        let now = Instant::now();

        task_at(&mut kc, &stop, now).unwrap();
        wait_for_exit(&mut kc);
        let err = task_at(&mut kc, &stop, now).unwrap_err();
        assert!(matches!(
            err,
            RtevalError::ModuleFailure { ref module, ref status }
                if module == NAME && status == "node0: returned 2"
        ));
    }

    #[test]
    fn test_oom_killed_build_waits_for_backoff() {
        let (_bin, _dir, mut kc) = scripted("kill -9 0");
        let stop = StopToken::new();
        let mut now = Instant::now();

        task_at(&mut kc, &stop, now).unwrap();
        wait_for_exit(&mut kc);
        now += Duration::from_secs(1);
        task_at(&mut kc, &stop, now).unwrap();
        assert_eq!(kc.backoff.failures(), 1);
        assert!(kc.jobs[0].unit.is_none());

        task_at(&mut kc, &stop, now + Duration::from_secs(4)).unwrap();
        assert_eq!(kc.builds, 1);
        now += Duration::from_secs(5);
        task_at(&mut kc, &stop, now).unwrap();
        assert_eq!(kc.builds, 2);

        // killed again right away: the delay doubles
        wait_for_exit(&mut kc);
        task_at(&mut kc, &stop, now + Duration::from_secs(1)).unwrap();
        assert_eq!(kc.backoff.current_delay(), Some(Duration::from_secs(10)));
        kc.cleanup().unwrap();
    }

    #[test]
    fn test_cleanup_stops_builds() {
        let (_bin, _dir, mut kc) = scripted("exec sleep 30");
        let stop = StopToken::new();
        task_at(&mut kc, &stop, Instant::now()).unwrap();
        assert!(kc.is_alive());
        assert_eq!(kc.live_units(), 1);

        let started = Instant::now();
        kc.cleanup().unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!kc.is_alive());
        assert_eq!(kc.live_units(), 0);
    }
}

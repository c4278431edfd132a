//! Full runs against the real tools.
//!
//! # Requirements
//!
//! - Root privileges
//! - hackbench and cyclictest from the rt-tests package
//! - stress-ng for the stressor run

use super::common::{check_rt_prerequisites, run_on_host, short_config};
use rteval_common::params::ModuleParams;
use rteval_runtime::StopReason;
use std::time::Duration;

#[test]
#[ignore = "Requires root, hackbench and cyclictest"]
fn test_hackbench_with_cyclictest() {
    if let Err(e) = check_rt_prerequisites(&["hackbench", "cyclictest"]) {
        eprintln!("Skipping test: {e}");
        return;
    }

    let workdir = tempfile::tempdir().unwrap();
    let config = short_config(workdir.path(), Duration::from_secs(20), &["hackbench"]);
    let outcome = run_on_host(&config, workdir.path()).expect("run failed");

    assert_eq!(outcome.stop_reason, StopReason::Completed);
    assert_eq!(outcome.exit_code(), 0);

    let profile = &outcome.profiles[0];
    assert!(profile.status_reports >= 2);
    let cyclictest = &profile.measurements[0];
    let samples = cyclictest.data["stats"]["samples"].as_u64().unwrap_or(0);
    println!("cyclictest: {}", serde_json::to_string_pretty(&cyclictest.data).unwrap());
    assert!(samples > 0, "no latency samples collected");
}

#[test]
#[ignore = "Requires root, stress-ng and cyclictest"]
fn test_stressor_with_cyclictest() {
    if let Err(e) = check_rt_prerequisites(&["stress-ng", "cyclictest"]) {
        eprintln!("Skipping test: {e}");
        return;
    }

    let workdir = tempfile::tempdir().unwrap();
    let mut config = short_config(workdir.path(), Duration::from_secs(15), &["stressng"]);
    config.loads.modules.insert(
        "stressng".into(),
        ModuleParams::new().with("option", "cpu").with("arg", "0"),
    );
    let outcome = run_on_host(&config, workdir.path()).expect("run failed");

    assert_eq!(outcome.stop_reason, StopReason::Completed);
    let loads = &outcome.profiles[0].loads;
    assert!(loads.iter().any(|r| r.name == "stressng" && r.ran));
    assert!(workdir.path().join("cyclictest.hist").exists());
}

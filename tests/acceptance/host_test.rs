//! Host probes that need no privileges.

use rteval_runtime::host::{check_rt_capabilities, kernel_release, read_load_average};
use rteval_runtime::{CpuList, SystemTopology};
use std::path::Path;

#[test]
fn test_discover_host_topology() {
    let topology = SystemTopology::discover().expect("topology discovery failed");
    assert!(topology.node_count() >= 1);

    let cpus = topology.all_cpus();
    assert!(!cpus.is_empty());

    // Every node's CPUs round-trip through the cpulist syntax
    for node in topology.nodes() {
        let text = node.cpus().collapse();
        let parsed: CpuList = text.parse().unwrap();
        assert_eq!(&parsed, node.cpus());
    }
    println!("{topology}: cpus {cpus}");
}

#[test]
fn test_host_probes() {
    let caps = check_rt_capabilities();
    println!("capabilities: {caps:?}");
    assert!(kernel_release().is_some());

    let load = read_load_average(Path::new("/proc/loadavg")).unwrap();
    assert!(load >= 0.0);
}

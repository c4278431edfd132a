//! Load modules and their shared placement helpers.

pub mod hackbench;
pub mod kcompile;
pub mod stressng;

use crate::topology::{CpuList, SystemTopology};
use std::collections::BTreeMap;
use std::fmt;
use std::process::Command;
use tracing::debug;

/// How a work unit is pinned to its CPUs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binder {
    /// `numactl --cpunodebind <node>`.
    Numactl(u32),
    /// `taskset -c <cpulist>`.
    Taskset(CpuList),
    /// No affinity wrapper.
    Unbound,
}

impl Binder {
    /// Binder for a node: `numactl` when it is installed and the node's
    /// CPUs are not restricted by a cpulist, `taskset` otherwise.
    #[must_use]
    pub fn for_node(node: u32, cpus: &CpuList, restricted: bool, has_numactl: bool) -> Self {
        if has_numactl && !restricted {
            Self::Numactl(node)
        } else {
            Self::Taskset(cpus.clone())
        }
    }

    /// Wrapper program and its arguments, empty when unbound.
    #[must_use]
    pub fn argv(&self) -> Vec<String> {
        match self {
            Self::Numactl(node) => vec!["numactl".into(), "--cpunodebind".into(), node.to_string()],
            Self::Taskset(cpus) => vec!["taskset".into(), "-c".into(), cpus.collapse()],
            Self::Unbound => Vec::new(),
        }
    }

    /// `program args...` wrapped by the binder.
    #[must_use]
    pub fn command(&self, program: &str, args: &[String]) -> Command {
        let mut argv = self.argv();
        argv.push(program.to_string());
        argv.extend(args.iter().cloned());

        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..]);
        cmd
    }
}

impl fmt::Display for Binder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.argv().join(" "))
    }
}

/// Per-node CPUs a load may use: node CPUs intersected with `cpulist`,
/// nodes left without CPUs dropped.
pub(crate) fn node_placement(
    module: &str,
    topology: &SystemTopology,
    cpulist: Option<&CpuList>,
) -> BTreeMap<u32, CpuList> {
    let mut placement = BTreeMap::new();
    for node in topology.nodes() {
        let cpus = match cpulist {
            Some(allowed) => node.cpus().intersect(allowed),
            None => node.cpus().clone(),
        };
        if cpus.is_empty() {
            debug!(module, node = node.id(), "Node has no available cpus, removing");
            continue;
        }
        placement.insert(node.id(), cpus);
    }
    placement
}

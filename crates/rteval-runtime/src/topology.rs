//! NUMA topology and CPU list handling.
//!
//! Topology is read once from sysfs when the run is configured and shared
//! read-only (behind an `Arc`) by every module afterwards.
//!
//! CPU lists use the kernel's cpulist syntax (`"0-3,7,9-10"`). The
//! collapsed form keeps one quirk of the tooling it feeds: a run of exactly
//! two CPUs is written as `"a,b"`, never `"a-b"`.

use rteval_common::error::{RtevalError, RtevalResult};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, warn};

/// Errors produced while parsing a cpulist string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CpuListError {
    /// A token is neither an integer nor an `a-b` range.
    #[error("invalid cpulist token {0:?}")]
    InvalidToken(String),
    /// A range whose start is above its end.
    #[error("reversed cpu range {start}-{end}")]
    ReversedRange {
        /// First CPU of the range.
        start: usize,
        /// Last CPU of the range.
        end: usize,
    },
    /// A CPU number at or above [`MAX_CPUS`].
    #[error("cpu {0} out of range (limit {})", MAX_CPUS)]
    OutOfRange(usize),
}

/// Upper bound on CPU numbers accepted in a cpulist.
pub const MAX_CPUS: usize = 65536;

/// Sorted, duplicate-free set of CPU indices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CpuList(Vec<usize>);

impl CpuList {
    /// Build a list from arbitrary CPU numbers.
    pub fn new(cpus: impl IntoIterator<Item = usize>) -> Self {
        let mut cpus: Vec<usize> = cpus.into_iter().collect();
        cpus.sort_unstable();
        cpus.dedup();
        Self(cpus)
    }

    /// Expand a cpulist string such as `"0-3,7,9-10"`.
    ///
    /// Tokens may repeat or overlap; the result is always sorted and
    /// deduplicated. An empty (or all-whitespace) string yields an empty list.
    ///
    /// # Errors
    ///
    /// Returns [`CpuListError`] for malformed tokens, reversed ranges or CPU
    /// numbers at or above [`MAX_CPUS`].
    pub fn expand(spec: &str) -> Result<Self, CpuListError> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Ok(Self::default());
        }

        let mut cpus = Vec::new();
        for token in spec.split(',') {
            let token = token.trim();
            let parse = |s: &str| {
                let cpu = s
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| CpuListError::InvalidToken(token.to_string()))?;
                if cpu >= MAX_CPUS {
                    return Err(CpuListError::OutOfRange(cpu));
                }
                Ok(cpu)
            };
            match token.split_once('-') {
                Some((a, b)) => {
                    let (start, end) = (parse(a)?, parse(b)?);
                    if start > end {
                        return Err(CpuListError::ReversedRange { start, end });
                    }
                    cpus.extend(start..=end);
                }
                None => cpus.push(parse(token)?),
            }
        }
        Ok(Self::new(cpus))
    }

    /// Render the list in cpulist syntax.
    ///
    /// Consecutive runs of three or more CPUs become `a-b`, a run of two is
    /// written as `a,b` and singletons as `a`.
    #[must_use]
    pub fn collapse(&self) -> String {
        let mut parts = Vec::new();
        let mut rest = self.0.as_slice();

        while let Some(&first) = rest.first() {
            let last_idx = longest_sequence(rest);
            let last = rest[last_idx];
            match last_idx {
                0 => parts.push(first.to_string()),
                1 => parts.push(format!("{first},{last}")),
                _ => parts.push(format!("{first}-{last}")),
            }
            rest = &rest[last_idx + 1..];
        }

        parts.join(",")
    }

    /// Plain comma-separated form (`"0,1,2,3"`), as `taskset -c` accepts.
    #[must_use]
    pub fn join(&self) -> String {
        self.0
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Keep only CPUs the oracle reports online.
    #[must_use]
    pub fn filter_online(&self, oracle: &dyn CpuOnline) -> Self {
        Self(self.0.iter().copied().filter(|&cpu| oracle.is_online(cpu)).collect())
    }

    /// CPUs present in both lists.
    #[must_use]
    pub fn intersect(&self, other: &CpuList) -> Self {
        Self(self.0.iter().copied().filter(|cpu| other.contains(*cpu)).collect())
    }

    /// Whether `cpu` is in the list.
    #[must_use]
    pub fn contains(&self, cpu: usize) -> bool {
        self.0.binary_search(&cpu).is_ok()
    }

    /// Number of CPUs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().copied()
    }

    /// Sorted CPU numbers.
    #[must_use]
    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }
}

/// Index of the last element of the leading run that steps by one.
fn longest_sequence(cpus: &[usize]) -> usize {
    cpus.windows(2)
        .position(|pair| pair[1] != pair[0] + 1)
        .unwrap_or(cpus.len().saturating_sub(1))
}

impl fmt::Display for CpuList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.collapse())
    }
}

impl FromStr for CpuList {
    type Err = CpuListError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::expand(s)
    }
}

impl FromIterator<usize> for CpuList {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        Self::new(iter)
    }
}

/// Source of truth for whether a CPU is online.
pub trait CpuOnline {
    /// Whether `cpu` is currently online.
    fn is_online(&self, cpu: usize) -> bool;
}

/// Treats every CPU as online.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllOnline;

impl CpuOnline for AllOnline {
    fn is_online(&self, _cpu: usize) -> bool {
        true
    }
}

/// Reads `cpuN/online` below the sysfs CPU directory.
///
/// A CPU without an `online` file counts as online: older kernels do not
/// expose the file at all, and cpu0 often cannot be offlined.
#[derive(Debug, Clone)]
pub struct SysfsCpuOnline {
    cpu_dir: PathBuf,
}

impl SysfsCpuOnline {
    /// Oracle rooted at `cpu_dir` (normally `/sys/devices/system/cpu`).
    pub fn new(cpu_dir: impl Into<PathBuf>) -> Self {
        Self {
            cpu_dir: cpu_dir.into(),
        }
    }
}

impl CpuOnline for SysfsCpuOnline {
    fn is_online(&self, cpu: usize) -> bool {
        let path = self.cpu_dir.join(format!("cpu{cpu}")).join("online");
        match fs::read_to_string(&path) {
            Ok(content) => content.trim() == "1",
            Err(_) => true,
        }
    }
}

/// A NUMA node: its CPUs and its memory counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumaNode {
    id: u32,
    cpus: CpuList,
    meminfo: BTreeMap<String, u64>,
}

impl NumaNode {
    /// Create a node from already-known data.
    pub fn new(id: u32, cpus: CpuList, meminfo: BTreeMap<String, u64>) -> Self {
        Self { id, cpus, meminfo }
    }

    /// Read a node directory such as `/sys/devices/system/node/node0`.
    fn from_sysfs(id: u32, path: &Path, oracle: &dyn CpuOnline) -> RtevalResult<Self> {
        let cpulist_path = path.join("cpulist");
        let raw = fs::read_to_string(&cpulist_path)
            .map_err(|e| RtevalError::io(cpulist_path.display(), &e))?;
        let cpus = CpuList::expand(&raw)
            .map_err(|e| RtevalError::Topology(format!("node{id}: {e}")))?
            .filter_online(oracle);

        let meminfo_path = path.join("meminfo");
        let meminfo = match fs::read_to_string(&meminfo_path) {
            Ok(content) => parse_meminfo(&content),
            Err(e) => {
                warn!(node = id, error = %e, "No meminfo for node");
                BTreeMap::new()
            }
        };

        Ok(Self::new(id, cpus, meminfo))
    }

    /// Node id.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Online CPUs of this node.
    #[must_use]
    pub fn cpus(&self) -> &CpuList {
        &self.cpus
    }

    /// Memory counters in bytes, keyed as in `meminfo` (`MemTotal`, ...).
    #[must_use]
    pub fn meminfo(&self) -> &BTreeMap<String, u64> {
        &self.meminfo
    }

    /// `MemTotal` in bytes, 0 if unknown.
    #[must_use]
    pub fn mem_total(&self) -> u64 {
        self.meminfo.get("MemTotal").copied().unwrap_or(0)
    }
}

impl fmt::Display for NumaNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node{}: {}", self.id, self.cpus)
    }
}

/// Parse node or system `meminfo` content into byte counts.
///
/// Accepts both the per-node layout (`Node 0 MemTotal: 123 kB`) and the
/// `/proc/meminfo` layout (`MemTotal: 123 kB`).
#[must_use]
pub fn parse_meminfo(content: &str) -> BTreeMap<String, u64> {
    let mut info = BTreeMap::new();
    for line in content.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let fields = match fields.first() {
            Some(&"Node") => fields.get(2..).unwrap_or(&[]),
            _ => &fields[..],
        };
        let (Some(key), Some(value)) = (fields.first(), fields.get(1)) else {
            continue;
        };
        let Ok(mut value) = value.parse::<u64>() else {
            continue;
        };
        if fields.get(2) == Some(&"kB") {
            value = value.saturating_mul(1024);
        }
        info.insert(key.trim_end_matches(':').to_string(), value);
    }
    info
}

/// Where topology information is read from.
#[derive(Debug, Clone)]
pub struct SysfsLayout {
    /// NUMA node directory (`/sys/devices/system/node`).
    pub node_dir: PathBuf,
    /// CPU directory (`/sys/devices/system/cpu`).
    pub cpu_dir: PathBuf,
    /// System-wide meminfo (`/proc/meminfo`), used without NUMA support.
    pub meminfo: PathBuf,
}

impl Default for SysfsLayout {
    fn default() -> Self {
        Self {
            node_dir: PathBuf::from("/sys/devices/system/node"),
            cpu_dir: PathBuf::from("/sys/devices/system/cpu"),
            meminfo: PathBuf::from("/proc/meminfo"),
        }
    }
}

impl SysfsLayout {
    /// Layout below an alternative root, for tests against a fake tree.
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            node_dir: root.join("sys/devices/system/node"),
            cpu_dir: root.join("sys/devices/system/cpu"),
            meminfo: root.join("proc/meminfo"),
        }
    }
}

/// The machine's NUMA nodes, ordered by node id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemTopology {
    nodes: BTreeMap<u32, NumaNode>,
}

impl SystemTopology {
    /// Discover the topology of the running host.
    ///
    /// # Errors
    ///
    /// Returns [`RtevalError::Topology`] when no node can be found.
    pub fn discover() -> RtevalResult<Self> {
        Self::discover_in(&SysfsLayout::default())
    }

    /// Discover the topology from an explicit sysfs layout.
    ///
    /// Kernels built without NUMA support have no node directory; the whole
    /// machine is then modelled as a single node 0.
    ///
    /// # Errors
    ///
    /// Returns [`RtevalError::Topology`] when the node directory exists but
    /// holds no nodes, or a node's files cannot be read.
    pub fn discover_in(layout: &SysfsLayout) -> RtevalResult<Self> {
        let oracle = SysfsCpuOnline::new(&layout.cpu_dir);

        if !layout.node_dir.is_dir() {
            debug!(path = %layout.node_dir.display(), "No NUMA node directory, assuming one node");
            return Self::single_node(layout, &oracle);
        }

        let entries = fs::read_dir(&layout.node_dir)
            .map_err(|e| RtevalError::io(layout.node_dir.display(), &e))?;

        let mut nodes = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| RtevalError::io(layout.node_dir.display(), &e))?;
            let name = entry.file_name();
            let Some(id) = name
                .to_str()
                .and_then(|n| n.strip_prefix("node"))
                .and_then(|n| n.parse::<u32>().ok())
            else {
                continue;
            };
            nodes.push(NumaNode::from_sysfs(id, &entry.path(), &oracle)?);
        }

        if nodes.is_empty() {
            return Err(RtevalError::Topology(format!(
                "No valid nodes found in {}!",
                layout.node_dir.display()
            )));
        }

        let topology = Self::from_nodes(nodes)?;
        debug!(%topology, "Topology discovered");
        Ok(topology)
    }

    fn single_node(layout: &SysfsLayout, oracle: &dyn CpuOnline) -> RtevalResult<Self> {
        let online_path = layout.cpu_dir.join("online");
        let raw = fs::read_to_string(&online_path)
            .map_err(|e| RtevalError::Topology(format!("{}: {e}", online_path.display())))?;
        let cpus = CpuList::expand(&raw)
            .map_err(|e| RtevalError::Topology(e.to_string()))?
            .filter_online(oracle);
        let meminfo = fs::read_to_string(&layout.meminfo)
            .map(|content| parse_meminfo(&content))
            .unwrap_or_default();
        Self::from_nodes(vec![NumaNode::new(0, cpus, meminfo)])
    }

    /// Build a topology from known nodes.
    ///
    /// # Errors
    ///
    /// Returns [`RtevalError::Topology`] if `nodes` is empty, a node id
    /// repeats, or a CPU belongs to more than one node.
    pub fn from_nodes(nodes: Vec<NumaNode>) -> RtevalResult<Self> {
        if nodes.is_empty() {
            return Err(RtevalError::Topology("No valid nodes found".into()));
        }

        let mut owner: BTreeMap<usize, u32> = BTreeMap::new();
        let mut map = BTreeMap::new();
        for node in nodes {
            for cpu in node.cpus.iter() {
                if let Some(other) = owner.insert(cpu, node.id) {
                    return Err(RtevalError::Topology(format!(
                        "cpu{cpu} belongs to both node{other} and node{}",
                        node.id
                    )));
                }
            }
            let id = node.id;
            if map.insert(id, node).is_some() {
                return Err(RtevalError::Topology(format!("node{id} listed twice")));
            }
        }

        Ok(Self { nodes: map })
    }

    /// Number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Node ids in ascending order.
    pub fn node_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.nodes.keys().copied()
    }

    /// Nodes in ascending id order.
    pub fn nodes(&self) -> impl Iterator<Item = &NumaNode> {
        self.nodes.values()
    }

    /// Look up a node.
    #[must_use]
    pub fn node(&self, id: u32) -> Option<&NumaNode> {
        self.nodes.get(&id)
    }

    /// CPUs of a node.
    #[must_use]
    pub fn cpus(&self, id: u32) -> Option<&CpuList> {
        self.nodes.get(&id).map(NumaNode::cpus)
    }

    /// Every CPU of every node.
    #[must_use]
    pub fn all_cpus(&self) -> CpuList {
        self.nodes.values().flat_map(|n| n.cpus.iter()).collect()
    }

    /// Sum of node `MemTotal` values in bytes.
    #[must_use]
    pub fn total_memory(&self) -> u64 {
        self.nodes.values().map(NumaNode::mem_total).sum()
    }

    /// CPU count of the largest node.
    #[must_use]
    pub fn largest_node_cpus(&self) -> usize {
        self.nodes.values().map(|n| n.cpus.len()).max().unwrap_or(0)
    }
}

impl fmt::Display for SystemTopology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let first = self.nodes.values().next().map_or(0, |n| n.cpus.len());
        write!(f, "{} node system ({} cores per node)", self.nodes.len(), first)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_expand_example() {
        let cpus = CpuList::expand("0-3,7,9-10").unwrap();
        assert_eq!(cpus.as_slice(), &[0, 1, 2, 3, 7, 9, 10]);
        let back = CpuList::expand(&cpus.collapse()).unwrap();
        assert_eq!(back, cpus);
    }

    #[test]
    fn test_expand_coalesces_and_sorts() {
        let cpus = CpuList::expand("9,3-5,4,0,5-6").unwrap();
        assert_eq!(cpus.as_slice(), &[0, 3, 4, 5, 6, 9]);
        assert_eq!(CpuList::expand(" 1,0\n").unwrap().as_slice(), &[0, 1]);
        assert!(CpuList::expand("").unwrap().is_empty());
    }

    #[test]
    fn test_expand_rejects_garbage() {
        assert_eq!(
            CpuList::expand("1,x").unwrap_err(),
            CpuListError::InvalidToken("x".into())
        );
        assert_eq!(
            CpuList::expand("5-2").unwrap_err(),
            CpuListError::ReversedRange { start: 5, end: 2 }
        );
        assert!(CpuList::expand("1--3").is_err());
    }

    #[test]
    fn test_expand_rejects_huge_cpu_numbers() {
        assert_eq!(
            CpuList::expand("0-4000000000").unwrap_err(),
            CpuListError::OutOfRange(4_000_000_000)
        );
        assert_eq!(
            CpuList::expand("65536").unwrap_err(),
            CpuListError::OutOfRange(MAX_CPUS)
        );
        assert_eq!(CpuList::expand("65535").unwrap().len(), 1);
    }

    #[test]
    fn test_collapse_two_runs_stay_comma_pairs() {
        assert_eq!(CpuList::new([0, 1, 2, 3, 4, 5, 7, 9]).collapse(), "0-5,7,9");
        assert_eq!(CpuList::new([0, 1]).collapse(), "0,1");
        assert_eq!(CpuList::new([0, 1, 3, 4, 5]).collapse(), "0,1,3-5");
        assert_eq!(CpuList::new([2]).collapse(), "2");
        assert_eq!(CpuList::default().collapse(), "");
    }

    #[test]
    fn test_collapse_is_stable_after_one_pass() {
        let inputs = ["0-3,7,9-10", "0,1,2", "1,3,5,6", "4-4,2,3", "0-63", "10,11,13,14,15"];
        for input in inputs {
            let once = CpuList::expand(input).unwrap().collapse();
            let twice = CpuList::expand(&once).unwrap().collapse();
            assert_eq!(once, twice, "input {input}");

            let expanded = CpuList::expand(&once).unwrap();
            let unique: HashSet<usize> = expanded.iter().collect();
            assert_eq!(unique.len(), expanded.len());
        }
    }

    #[test]
    fn test_join_and_intersect() {
        let a = CpuList::expand("0-5").unwrap();
        let b = CpuList::expand("4-9").unwrap();
        assert_eq!(a.intersect(&b).join(), "4,5");
        assert!(a.contains(3));
        assert!(!a.contains(6));
    }

    #[test]
    fn test_sysfs_online_oracle() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "cpu1/online", "0\n");
        write(dir.path(), "cpu2/online", "1\n");
        let oracle = SysfsCpuOnline::new(dir.path());

        // cpu0 has no online file and counts as online
        let online = CpuList::new([0, 1, 2]).filter_online(&oracle);
        assert_eq!(online.as_slice(), &[0, 2]);
    }

    #[test]
    fn test_parse_meminfo_layouts() {
        let node = "Node 0 MemTotal:       16318676 kB\nNode 0 MemFree:  1000 kB\nNode 0 HugePages_Total:     0\n";
        let info = parse_meminfo(node);
        assert_eq!(info["MemTotal"], 16_318_676 * 1024);
        assert_eq!(info["HugePages_Total"], 0);

        let system = "MemTotal:        8000000 kB\ngarbage\n";
        let info = parse_meminfo(system);
        assert_eq!(info["MemTotal"], 8_000_000 * 1024);
        assert_eq!(info.len(), 1);

        let corrupt = format!("MemTotal: {} kB\n", u64::MAX / 2);
        assert_eq!(parse_meminfo(&corrupt)["MemTotal"], u64::MAX);
    }

    #[test]
    fn test_discover_two_nodes() {
        let root = tempfile::tempdir().unwrap();
        let r = root.path();
        write(r, "sys/devices/system/node/node0/cpulist", "0-3\n");
        write(r, "sys/devices/system/node/node0/meminfo", "Node 0 MemTotal: 8388608 kB\n");
        write(r, "sys/devices/system/node/node1/cpulist", "4-7\n");
        write(r, "sys/devices/system/node/node1/meminfo", "Node 1 MemTotal: 8388608 kB\n");
        write(r, "sys/devices/system/node/possible", "0-1\n");
        write(r, "sys/devices/system/cpu/cpu5/online", "0\n");

        let topo = SystemTopology::discover_in(&SysfsLayout::rooted_at(r)).unwrap();
        assert_eq!(topo.node_count(), 2);
        assert_eq!(topo.cpus(0).unwrap().collapse(), "0-3");
        // cpu5 is offline
        assert_eq!(topo.cpus(1).unwrap().collapse(), "4,6,7");
        assert_eq!(topo.node(1).unwrap().mem_total(), 8 * 1024 * 1024 * 1024);
        assert_eq!(topo.to_string(), "2 node system (4 cores per node)");
    }

    #[test]
    fn test_discover_without_numa_support() {
        let root = tempfile::tempdir().unwrap();
        let r = root.path();
        write(r, "sys/devices/system/cpu/online", "0-5\n");
        write(r, "proc/meminfo", "MemTotal: 4194304 kB\n");

        let topo = SystemTopology::discover_in(&SysfsLayout::rooted_at(r)).unwrap();
        assert_eq!(topo.node_count(), 1);
        assert_eq!(topo.all_cpus().len(), 6);
        assert_eq!(topo.total_memory(), 4 * 1024 * 1024 * 1024);
    }

    #[test]
    fn test_discover_empty_node_dir_fails() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("sys/devices/system/node")).unwrap();
        let err = SystemTopology::discover_in(&SysfsLayout::rooted_at(root.path())).unwrap_err();
        assert!(matches!(err, RtevalError::Topology(_)));
    }

    #[test]
    fn test_every_cpu_in_exactly_one_node() {
        let nodes = vec![
            NumaNode::new(0, CpuList::expand("0-3,8").unwrap(), BTreeMap::new()),
            NumaNode::new(1, CpuList::expand("4-7").unwrap(), BTreeMap::new()),
            NumaNode::new(2, CpuList::default(), BTreeMap::new()),
        ];
        let topo = SystemTopology::from_nodes(nodes).unwrap();

        let per_node: usize = topo.nodes().map(|n| n.cpus().len()).sum();
        assert_eq!(per_node, topo.all_cpus().len());
        for cpu in topo.all_cpus().iter() {
            let owners = topo.nodes().filter(|n| n.cpus().contains(cpu)).count();
            assert_eq!(owners, 1, "cpu{cpu}");
        }
        assert_eq!(topo.largest_node_cpus(), 5);
    }

    #[test]
    fn test_overlapping_nodes_rejected() {
        let nodes = vec![
            NumaNode::new(0, CpuList::expand("0-3").unwrap(), BTreeMap::new()),
            NumaNode::new(1, CpuList::expand("3-5").unwrap(), BTreeMap::new()),
        ];
        let err = SystemTopology::from_nodes(nodes).unwrap_err();
        assert!(err.to_string().contains("cpu3"));
        assert!(SystemTopology::from_nodes(Vec::new()).is_err());
    }
}

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, warn};

use crate::constants::{ESTIMATED_MEMORY_BANDWIDTH_GBS, MAX_CPU_IDS, MAX_NUMA_NODES};
use crate::error::{Result, TelemetryError};

/// Field of a NUMA node that could not be read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NodeField {
	/// `meminfo` missing or without a parsable `MemTotal:` line
	Memory,
	/// `cpulist` missing or malformed
	CpuList,
}

/// One NUMA node as described by sysfs
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NumaNode {
	pub node_id: usize,

	/// Total node memory in MB, 0 when `degraded` contains `Memory`
	pub memory_size_mb: u64,

	/// CPUs of the node, ascending, without duplicates
	pub cpu_list: Vec<usize>,

	/// Fixed estimate, not measured
	pub memory_bandwidth_gbs: f64,

	/// Fields that fell back to an empty value
	pub degraded: Vec<NodeField>,
}

/// CPU count and NUMA layout of the machine, discovered once
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CpuTopology {
	/// Number of schedulable logical CPUs
	pub cpu_count: usize,

	/// NUMA nodes, empty when the kernel exposes no NUMA information
	pub numa_nodes: Vec<NumaNode>,
}

impl CpuTopology {
	/// Discovers the NUMA nodes below `numa_root` of a `cpu_count` CPU system
	pub fn discover(cpu_count: usize, numa_root: &Path) -> Self {
		let topology = Self {
			cpu_count,
			numa_nodes: discover_numa_nodes(numa_root),
		};
		debug!(nodes = topology.numa_nodes.len(), "NUMA topology discovered");
		topology
	}

	pub fn is_numa(&self) -> bool {
		self.numa_nodes.len() > 1
	}

	/// Node with the most memory, the preferred place for new allocations
	pub fn best_numa_node(&self) -> Option<&NumaNode> {
		self.numa_nodes
			.iter()
			.filter(|node| !node.degraded.contains(&NodeField::Memory))
			.max_by(|a, b| a.memory_size_mb.cmp(&b.memory_size_mb).then(b.node_id.cmp(&a.node_id)))
	}

	/// Node owning `cpu_id`
	pub fn node_of_cpu(&self, cpu_id: usize) -> Option<&NumaNode> {
		self.numa_nodes.iter().find(|node| node.cpu_list.binary_search(&cpu_id).is_ok())
	}

	pub fn node(&self, node_id: usize) -> Option<&NumaNode> {
		self.numa_nodes.iter().find(|node| node.node_id == node_id)
	}

	/// Pins process `pid` (0 for the caller) to the CPUs of `node_id`
	pub fn bind_to_numa_node(&self, pid: libc::pid_t, node_id: usize) -> Result<()> {
		let node = self
			.node(node_id)
			.ok_or_else(|| TelemetryError::InvalidArgument(format!("NUMA node {} does not exist", node_id)))?;

		if node.cpu_list.is_empty() {
			return Err(TelemetryError::InvalidArgument(format!("NUMA node {} has no CPUs", node_id)));
		}

		set_process_affinity(pid, &node.cpu_list)
	}
}

/// Number of schedulable logical CPUs
pub fn detect_cpu_count() -> usize {
	num_cpus::get()
}

/// Discovers NUMA nodes `node0..node{MAX_NUMA_NODES}` below `root`
///
/// Returns an empty list when `root` does not exist. Probing stops at the
/// first missing node directory. A node whose memory or CPU list cannot be
/// parsed is still returned, with that field emptied and marked degraded.
pub fn discover_numa_nodes(root: &Path) -> Vec<NumaNode> {
	let mut nodes = Vec::new();

	if !root.is_dir() {
		debug!(path = %root.display(), "NUMA topology not exposed");
		return nodes;
	}

	let mut claimed = HashSet::new();

	for node_id in 0..MAX_NUMA_NODES {
		let node_path = root.join(format!("node{}", node_id));
		if !node_path.is_dir() {
			break;
		}

		let mut node = parse_numa_node(&node_path, node_id);

		// Node CPU lists must stay disjoint
		node.cpu_list.retain(|&cpu| {
			let fresh = claimed.insert(cpu);
			if !fresh {
				warn!(node_id, cpu, "CPU already belongs to a lower NUMA node, dropping");
			}
			fresh
		});

		nodes.push(node);
	}

	nodes
}

fn parse_numa_node(node_path: &Path, node_id: usize) -> NumaNode {
	let mut degraded = Vec::new();

	let memory_size_mb = match read_node_memory_kb(node_path) {
		Ok(kb) => kb / 1024,
		Err(e) => {
			warn!(node_id, error = %e, "Failed to read NUMA node memory");
			degraded.push(NodeField::Memory);
			0
		},
	};

	let cpu_list = match read_node_cpus(node_path) {
		Ok(cpus) => cpus,
		Err(e) => {
			warn!(node_id, error = %e, "Failed to read NUMA node CPU list");
			degraded.push(NodeField::CpuList);
			Vec::new()
		},
	};

	NumaNode {
		node_id,
		memory_size_mb,
		cpu_list,
		memory_bandwidth_gbs: ESTIMATED_MEMORY_BANDWIDTH_GBS,
		degraded,
	}
}

fn read_node_memory_kb(node_path: &Path) -> Result<u64> {
	let path = node_path.join("meminfo");
	let content = read_topology_file(&path)?;

	parse_mem_total_kb(&content).ok_or_else(|| TelemetryError::TopologyParse {
		path,
		message: "no parsable MemTotal line".into(),
	})
}

fn read_node_cpus(node_path: &Path) -> Result<Vec<usize>> {
	let path = node_path.join("cpulist");
	let content = read_topology_file(&path)?;
	let first_line = content.lines().next().unwrap_or("");

	parse_cpu_list(first_line).map_err(|message| TelemetryError::TopologyParse { path, message })
}

fn read_topology_file(path: &Path) -> Result<String> {
	fs::read_to_string(path).map_err(|e| TelemetryError::io(path, e))
}

/// Extracts the kB value following `MemTotal:` in a node meminfo file
///
/// Lines look like `Node 0 MemTotal:       16318268 kB`.
pub fn parse_mem_total_kb(meminfo: &str) -> Option<u64> {
	meminfo.lines().find_map(|line| {
		let (_, rest) = line.split_once("MemTotal:")?;
		rest.split_whitespace().next()?.parse().ok()
	})
}

/// Expands a kernel CPU list such as `0-3,8-11` into individual CPU ids
///
/// Tokens are either a bare id or an inclusive `start-end` range. The result
/// is sorted and de-duplicated. Any malformed token, or an id at or above
/// `MAX_CPU_IDS`, rejects the whole list.
pub fn parse_cpu_list(list: &str) -> std::result::Result<Vec<usize>, String> {
	let mut cpus = Vec::new();
	let list = list.trim();

	if list.is_empty() {
		return Ok(cpus);
	}

	for token in list.split(',') {
		let token = token.trim();
		match token.split_once('-') {
			Some((start, end)) => {
				let start = parse_cpu_id(start, token)?;
				let end = parse_cpu_id(end, token)?;
				if start > end {
					return Err(format!("descending range '{}'", token));
				}
				cpus.extend(start..=end);
			},
			None => cpus.push(parse_cpu_id(token, token)?),
		}
	}

	cpus.sort_unstable();
	cpus.dedup();
	Ok(cpus)
}

fn parse_cpu_id(value: &str, token: &str) -> std::result::Result<usize, String> {
	let id = value
		.trim()
		.parse::<usize>()
		.map_err(|_| format!("malformed token '{}'", token))?;

	if id >= MAX_CPU_IDS {
		return Err(format!("CPU id {} in '{}' exceeds {}", id, token, MAX_CPU_IDS - 1));
	}
	Ok(id)
}

fn set_process_affinity(pid: libc::pid_t, cpus: &[usize]) -> Result<()> {
	unsafe {
		let mut cpuset: libc::cpu_set_t = std::mem::zeroed();
		for &cpu in cpus {
			if cpu >= MAX_CPU_IDS {
				return Err(TelemetryError::InvalidArgument(format!(
					"CPU {} exceeds the affinity mask size",
					cpu
				)));
			}
			libc::CPU_SET(cpu, &mut cpuset);
		}

		let result = libc::sched_setaffinity(pid, std::mem::size_of::<libc::cpu_set_t>(), &cpuset);
		if result != 0 {
			let source = io::Error::last_os_error();
			if source.raw_os_error() == Some(libc::EINVAL) {
				return Err(TelemetryError::InvalidArgument(format!(
					"no online CPU in the affinity mask for pid {}",
					pid
				)));
			}
			return Err(TelemetryError::Syscall {
				call: "sched_setaffinity",
				source,
			});
		}
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_parse_cpu_list_ranges() {
		assert_eq!(parse_cpu_list("0-3,8-11").unwrap(), vec![0, 1, 2, 3, 8, 9, 10, 11]);
		assert_eq!(parse_cpu_list("5").unwrap(), vec![5]);
		assert_eq!(parse_cpu_list("0,2-3,7\n").unwrap(), vec![0, 2, 3, 7]);
		assert_eq!(parse_cpu_list("").unwrap(), Vec::<usize>::new());
	}

	#[test]
	fn test_parse_cpu_list_sorts_and_dedups() {
		assert_eq!(parse_cpu_list("8-9,0-1,1").unwrap(), vec![0, 1, 8, 9]);
	}

	#[test]
	fn test_parse_cpu_list_rejects_malformed() {
		assert!(parse_cpu_list("0-").is_err());
		assert!(parse_cpu_list("a-b").is_err());
		assert!(parse_cpu_list("3-1").is_err());
		assert!(parse_cpu_list("1,,2").is_err());
	}

	#[test]
	fn test_parse_cpu_list_rejects_huge_ids() {
		assert!(parse_cpu_list("0-18446744073709551615").is_err());
		assert!(parse_cpu_list(&MAX_CPU_IDS.to_string()).is_err());
		assert_eq!(parse_cpu_list(&(MAX_CPU_IDS - 1).to_string()).unwrap(), vec![MAX_CPU_IDS - 1]);
	}

	#[test]
	fn test_corrupt_cpulist_degrades_node() {
		let dir = tempfile::tempdir().unwrap();
		let node0 = dir.path().join("node0");
		fs::create_dir_all(&node0).unwrap();
		fs::write(node0.join("meminfo"), "Node 0 MemTotal: 2048 kB\n").unwrap();
		fs::write(node0.join("cpulist"), "0-18446744073709551615\n").unwrap();

		let nodes = discover_numa_nodes(dir.path());
		assert_eq!(nodes.len(), 1);
		assert!(nodes[0].cpu_list.is_empty());
		assert_eq!(nodes[0].degraded, vec![NodeField::CpuList]);
		assert_eq!(nodes[0].memory_size_mb, 2);
	}

	#[test]
	fn test_bind_failure_names_the_syscall() {
		let topology = CpuTopology {
			cpu_count: 1,
			numa_nodes: vec![node(0, 1024, vec![0])],
		};

		// No such process
		let err = topology.bind_to_numa_node(libc::pid_t::MAX, 0).unwrap_err();
		assert!(matches!(err, TelemetryError::Syscall { call: "sched_setaffinity", .. }));
		assert!(err.to_string().contains("sched_setaffinity"));
		assert!(!err.to_string().contains("/proc"));
	}

	#[test]
	fn test_parse_mem_total() {
		let meminfo = "Node 0 MemTotal:       16318268 kB\nNode 0 MemFree:        1234 kB\n";
		assert_eq!(parse_mem_total_kb(meminfo), Some(16_318_268));
		assert_eq!(parse_mem_total_kb("Node 0 MemFree: 1 kB"), None);
		assert_eq!(parse_mem_total_kb("Node 0 MemTotal: lots kB"), None);
	}

	fn node(node_id: usize, memory_size_mb: u64, cpu_list: Vec<usize>) -> NumaNode {
		NumaNode {
			node_id,
			memory_size_mb,
			cpu_list,
			memory_bandwidth_gbs: ESTIMATED_MEMORY_BANDWIDTH_GBS,
			degraded: Vec::new(),
		}
	}

	#[test]
	fn test_best_node_and_lookup() {
		let topology = CpuTopology {
			cpu_count: 8,
			numa_nodes: vec![node(0, 8192, vec![0, 1, 2, 3]), node(1, 16384, vec![4, 5, 6, 7])],
		};

		assert!(topology.is_numa());
		assert_eq!(topology.best_numa_node().map(|n| n.node_id), Some(1));
		assert_eq!(topology.node_of_cpu(5).map(|n| n.node_id), Some(1));
		assert!(topology.node_of_cpu(9).is_none());
	}

	#[test]
	fn test_bind_rejects_unknown_or_empty_node() {
		let topology = CpuTopology {
			cpu_count: 2,
			numa_nodes: vec![node(0, 1024, Vec::new())],
		};

		assert!(matches!(
			topology.bind_to_numa_node(0, 3),
			Err(TelemetryError::InvalidArgument(_))
		));
		assert!(matches!(
			topology.bind_to_numa_node(0, 0),
			Err(TelemetryError::InvalidArgument(_))
		));
	}

	#[test]
	fn test_missing_root_is_not_numa() {
		let dir = tempfile::tempdir().unwrap();
		assert!(discover_numa_nodes(&dir.path().join("node")).is_empty());
	}
}

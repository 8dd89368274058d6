use std::io::{self, Write};

use crate::metrics::CpuMetrics;
use crate::smart::SmartAttributes;
use crate::topology::{CpuTopology, NumaNode};

/// One line per CPU: temperature, frequency, power and optional DVFS target
pub fn format_metrics_line(metrics: &CpuMetrics, target_mhz: Option<u64>) -> String {
	let target = match target_mhz {
		Some(mhz) => format!(" | DVFS target: {:5} MHz", mhz),
		None => String::new(),
	};

	format!(
		"CPU {:3}: {:5.1} °C | {:5} MHz | {:7.2} W{}",
		metrics.cpu_id, metrics.temperature_celsius, metrics.frequency_mhz, metrics.power_watts, target
	)
}

/// Compact description of one NUMA node
pub fn format_numa_node(node: &NumaNode) -> String {
	let cpus: Vec<String> = node.cpu_list.iter().map(|cpu| cpu.to_string()).collect();
	let degraded = if node.degraded.is_empty() {
		String::new()
	} else {
		format!(" (unreadable: {:?})", node.degraded)
	};

	format!(
		"Node {}: {} MB RAM, ~{:.0} GB/s, CPUs: {}{}",
		node.node_id,
		node.memory_size_mb,
		node.memory_bandwidth_gbs,
		cpus.join(","),
		degraded
	)
}

/// Prints a sample header followed by one line per CPU
pub fn display_sample(sample: usize, lines: &[String]) -> io::Result<()> {
	let mut out = io::stdout().lock();
	writeln!(out, "Sample {}:", sample)?;
	for line in lines {
		writeln!(out, "  {}", line)?;
	}
	writeln!(out)?;
	out.flush()
}

/// Prints the NUMA layout, or a note that none was found
pub fn display_topology(topology: &CpuTopology) -> io::Result<()> {
	let mut out = io::stdout().lock();
	writeln!(out, "=== NUMA Topology ({} logical CPUs) ===", topology.cpu_count)?;

	if topology.numa_nodes.is_empty() {
		writeln!(out, "NUMA not supported or not detected")?;
	} else {
		for node in &topology.numa_nodes {
			writeln!(out, "{}", format_numa_node(node))?;
		}
		if let Some(best) = topology.best_numa_node() {
			writeln!(out, "Preferred node: {}", best.node_id)?;
		}
	}

	out.flush()
}

/// Prints whichever S.M.A.R.T. attributes were available
pub fn display_smart(attrs: &SmartAttributes) -> io::Result<()> {
	let mut out = io::stdout().lock();
	writeln!(out, "=== S.M.A.R.T. Data: {} ===", attrs.device_path)?;

	let fields = [
		("Power-on hours", attrs.power_on_hours),
		("Temperature (°C)", attrs.temperature_celsius),
		("Bytes written", attrs.total_bytes_written),
		("Bytes read", attrs.total_bytes_read),
		("Health (%)", attrs.health_percentage.map(u64::from)),
		("Wear leveling count", attrs.wear_leveling_count),
	];

	for (label, value) in fields {
		match value {
			Some(value) => writeln!(out, "{}: {}", label, value)?,
			None => writeln!(out, "{}: unavailable", label)?,
		}
	}

	out.flush()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::topology::NodeField;

	#[test]
	fn test_metrics_line() {
		let metrics = CpuMetrics {
			cpu_id: 3,
			temperature_celsius: 80.0,
			frequency_mhz: 3600,
			voltage_volts: 0.0,
			power_watts: 12.5,
			timestamp_us: 1,
		};

		let line = format_metrics_line(&metrics, Some(2500));
		assert!(line.starts_with("CPU   3:"));
		assert!(line.contains("3600 MHz"));
		assert!(line.contains("12.50 W"));
		assert!(line.ends_with("DVFS target:  2500 MHz"));
	}

	#[test]
	fn test_numa_node_marks_degraded_fields() {
		let node = NumaNode {
			node_id: 1,
			memory_size_mb: 0,
			cpu_list: vec![4, 5],
			memory_bandwidth_gbs: 40.0,
			degraded: vec![NodeField::Memory],
		};

		let text = format_numa_node(&node);
		assert_eq!(text, "Node 1: 0 MB RAM, ~40 GB/s, CPUs: 4,5 (unreadable: [Memory])");
	}
}

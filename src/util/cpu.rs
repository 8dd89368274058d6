use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use crate::error::{Result, TelemetryError};

/// Statistics for a single CPU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuStats {
	pub user: u64,
	pub nice: u64,
	pub system: u64,
	pub idle: u64,
	pub iowait: u64,
	pub irq: u64,
	pub softirq: u64,
	pub steal: u64,
	pub total: u64,
}

impl CpuStats {
	fn idle_time(&self) -> u64 {
		self.idle + self.iowait
	}
}

/// Parses the per-CPU `cpuN` rows of `/proc/stat`
pub fn parse_proc_stat(content: &str) -> HashMap<usize, CpuStats> {
	let mut stats = HashMap::new();

	for line in content.lines() {
		if !line.starts_with("cpu") || line.starts_with("cpu ") {
			continue;
		}

		let parts: Vec<&str> = line.split_whitespace().collect();
		if parts.len() < 8 {
			continue;
		}

		// Extract CPU ID from "cpuN"
		let Ok(cpu_id) = parts[0][3..].parse::<usize>() else {
			continue;
		};

		let field = |i: usize| parts.get(i).and_then(|v| v.parse::<u64>().ok()).unwrap_or(0);

		let mut cpu = CpuStats {
			user: field(1),
			nice: field(2),
			system: field(3),
			idle: field(4),
			iowait: field(5),
			irq: field(6),
			softirq: field(7),
			steal: field(8),
			total: 0,
		};
		cpu.total = cpu.user + cpu.nice + cpu.system + cpu.idle + cpu.iowait + cpu.irq + cpu.softirq + cpu.steal;

		stats.insert(cpu_id, cpu);
	}

	stats
}

/// Tracks per-CPU load between successive reads of `/proc/stat`
///
/// Supplies the `load_percent` input of frequency scaling decisions.
#[derive(Debug, Clone)]
pub struct CpuUtilization {
	stat_path: PathBuf,
	prev_stats: HashMap<usize, CpuStats>,
	load_percent: HashMap<usize, f64>,
}

impl CpuUtilization {
	/// Creates a tracker reading `stat_path`
	pub fn new(stat_path: impl Into<PathBuf>) -> Self {
		Self {
			stat_path: stat_path.into(),
			prev_stats: HashMap::new(),
			load_percent: HashMap::new(),
		}
	}

	/// Reads the statistics file and updates per-CPU load
	pub fn update(&mut self) -> Result<()> {
		let content = fs::read_to_string(&self.stat_path).map_err(|e| TelemetryError::io(&self.stat_path, e))?;
		self.update_from(&content);
		Ok(())
	}

	/// Updates per-CPU load from already-read `/proc/stat` content
	///
	/// A CPU seen for the first time reports 0 %.
	pub fn update_from(&mut self, content: &str) {
		let new_stats = parse_proc_stat(content);

		for (cpu_id, current) in &new_stats {
			let load = match self.prev_stats.get(cpu_id) {
				Some(prev) => {
					let total_diff = current.total.saturating_sub(prev.total);
					if total_diff == 0 {
						continue;
					}
					let idle_diff = current.idle_time().saturating_sub(prev.idle_time());
					(1.0 - idle_diff as f64 / total_diff as f64) * 100.0
				},
				None => 0.0,
			};

			self.load_percent.insert(*cpu_id, load.clamp(0.0, 100.0));
		}

		self.prev_stats = new_stats;
	}

	/// Load of `cpu_id` in percent, if it has been sampled
	pub fn load_percent(&self, cpu_id: usize) -> Option<f64> {
		self.load_percent.get(&cpu_id).copied()
	}
}

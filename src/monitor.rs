use std::sync::OnceLock;
use std::thread;

use tracing::{info, warn};

use crate::config::TelemetryConfig;
use crate::dvfs::FrequencyController;
use crate::error::{Result, TelemetryError};
use crate::metrics::CpuMetrics;
use crate::reader::CpuMetricsReader;
use crate::smart::{SmartAttributes, read_smart_attributes};
use crate::topology::{CpuTopology, detect_cpu_count};
use crate::util::msr::{MsrDevice, ensure_facility};
use crate::util::timestamp_us;

/// A CPU left out of one poll
#[derive(Debug)]
pub struct SkippedCpu {
	pub cpu_id: usize,
	pub error: TelemetryError,
}

/// Result of one poll over all open CPUs
#[derive(Debug, Default)]
pub struct PollReport {
	/// Snapshots ordered by CPU id
	pub metrics: Vec<CpuMetrics>,

	/// CPUs whose read failed this time
	pub skipped: Vec<SkippedCpu>,
}

/// Monitors every logical CPU of the system through its MSR device
///
/// Construction fails only when the MSR facility is missing and cannot be
/// loaded. CPUs whose device cannot be opened are logged and left out; a
/// monitor with no open CPUs is valid and polls to empty results.
pub struct SystemMonitor {
	config: TelemetryConfig,
	cpu_count: usize,
	readers: Vec<CpuMetricsReader<MsrDevice>>,
	topology: OnceLock<CpuTopology>,
	last_timestamp_us: u64,
}

impl SystemMonitor {
	/// Creates a monitor, opening one register handle per logical CPU
	pub fn new(config: TelemetryConfig) -> Result<Self> {
		ensure_facility(&config.msr_device_root, &config.modprobe_program, config.load_module)?;

		let cpu_count = config.cpu_count.unwrap_or_else(detect_cpu_count);
		let max_gap_us = u64::try_from(config.energy_max_gap().as_micros()).unwrap_or(u64::MAX);

		let mut readers = Vec::with_capacity(cpu_count);
		for cpu_id in 0..cpu_count {
			let reader = MsrDevice::open_at(&config.msr_device_root, cpu_id)
				.and_then(|device| CpuMetricsReader::new(device, max_gap_us));

			match reader {
				Ok(reader) => readers.push(reader),
				Err(e) => warn!(cpu_id, error = %e, "Excluding CPU from telemetry"),
			}
		}

		info!(cpu_count, open_cpus = readers.len(), "System monitor initialized");

		Ok(Self {
			config,
			cpu_count,
			readers,
			topology: OnceLock::new(),
			last_timestamp_us: 0,
		})
	}

	/// Creates a monitor against the real kernel paths
	pub fn with_defaults() -> Result<Self> {
		Self::new(TelemetryConfig::default())
	}

	pub fn config(&self) -> &TelemetryConfig {
		&self.config
	}

	/// Number of logical CPUs, including ones without an open handle
	pub fn cpu_count(&self) -> usize {
		self.cpu_count
	}

	/// CPUs that have an open register handle
	pub fn open_cpus(&self) -> Vec<usize> {
		self.readers.iter().map(|reader| reader.cpu_id()).collect()
	}

	/// Reads every open CPU in turn
	///
	/// A failing CPU is logged and reported in `skipped`; it stays open and
	/// is tried again on the next poll.
	pub fn poll(&mut self) -> PollReport {
		let mut report = PollReport::default();

		for reader in &mut self.readers {
			let now_us = next_timestamp(&mut self.last_timestamp_us);
			record(&mut report, reader.cpu_id(), reader.snapshot(now_us));
		}

		report
	}

	/// Snapshots of every CPU that could be read
	pub fn poll_all(&mut self) -> Vec<CpuMetrics> {
		self.poll().metrics
	}

	/// Like [`poll`](Self::poll), with CPUs read on scoped worker threads
	///
	/// Each reader is handed to exactly one worker; all workers finish before
	/// this returns.
	pub fn poll_parallel(&mut self) -> PollReport {
		if self.readers.is_empty() {
			return PollReport::default();
		}

		let stamps: Vec<u64> = (0..self.readers.len())
			.map(|_| next_timestamp(&mut self.last_timestamp_us))
			.collect();

		let workers = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
		let chunk_size = self.readers.len().div_ceil(workers);

		let results: Vec<(usize, Result<CpuMetrics>)> = thread::scope(|scope| {
			let handles: Vec<_> = self
				.readers
				.chunks_mut(chunk_size)
				.zip(stamps.chunks(chunk_size))
				.map(|(readers, stamps)| {
					scope.spawn(move || {
						readers
							.iter_mut()
							.zip(stamps)
							.map(|(reader, &now_us)| (reader.cpu_id(), reader.snapshot(now_us)))
							.collect::<Vec<_>>()
					})
				})
				.collect();

			handles
				.into_iter()
				.flat_map(|handle| match handle.join() {
					Ok(results) => results,
					Err(panic) => std::panic::resume_unwind(panic),
				})
				.collect()
		});

		let mut report = PollReport::default();
		for (cpu_id, result) in results {
			record(&mut report, cpu_id, result);
		}
		report
	}

	/// CPU count and NUMA nodes, discovered on first use
	pub fn topology(&self) -> &CpuTopology {
		self.topology
			.get_or_init(|| CpuTopology::discover(self.cpu_count, &self.config.numa_root))
	}

	/// S.M.A.R.T. attributes of `device`, e.g. `/dev/sda`
	pub fn disk_health(&self, device: &str) -> Result<SmartAttributes> {
		read_smart_attributes(&self.config.smartctl_program, device)
	}

	/// Controller writing through this monitor's cpufreq root
	pub fn frequency_controller(&self) -> FrequencyController {
		FrequencyController::new(&self.config.cpufreq_root)
	}
}

/// Next wall-clock stamp, strictly greater than the previous one
///
/// After a backwards clock step stamps advance 1 us at a time; power is
/// averaged over the monotonic clock and is unaffected.
fn next_timestamp(last_us: &mut u64) -> u64 {
	let now = timestamp_us().max(*last_us + 1);
	*last_us = now;
	now
}

fn record(report: &mut PollReport, cpu_id: usize, result: Result<CpuMetrics>) {
	match result {
		Ok(metrics) => report.metrics.push(metrics),
		Err(error) => {
			warn!(cpu_id, error = %error, "Skipping CPU in this poll");
			report.skipped.push(SkippedCpu { cpu_id, error });
		},
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::constants::*;
	use std::fs;
	use std::os::unix::fs::FileExt;
	use std::path::Path;
	use std::time::Duration;

	#[test]
	fn test_timestamps_strictly_increase() {
		let mut last = 0;
		let a = next_timestamp(&mut last);
		let b = next_timestamp(&mut last);
		let c = next_timestamp(&mut last);
		assert!(a < b && b < c);
	}

	fn fake_msr_tree(root: &Path, energy: u64) {
		let dir = root.join("0");
		fs::create_dir_all(&dir).unwrap();
		let file = fs::File::create(dir.join("msr")).unwrap();
		for (address, value) in [
			(INTEL_POWER_UNIT_MSR, 14 << 8),
			(MSR_TEMPERATURE_TARGET, 100 << 16),
			(IA32_THERM_STATUS_MSR, 20 << 16),
			(IA32_PERF_STATUS_MSR, 36 << 8),
			(INTEL_PKG_ENERGY_MSR, energy),
		] {
			file.write_all_at(&value.to_ne_bytes(), u64::from(address)).unwrap();
		}
	}

	#[test]
	fn test_clock_step_back_keeps_power_sane() {
		let dir = tempfile::tempdir().unwrap();
		fake_msr_tree(dir.path(), 0);

		let config = TelemetryConfig {
			msr_device_root: dir.path().to_path_buf(),
			load_module: false,
			cpu_count: Some(1),
			..Default::default()
		};
		let mut monitor = SystemMonitor::new(config).unwrap();

		// Last stamp an hour ahead of the wall clock
		let stepped = timestamp_us() + 3_600_000_000;
		monitor.last_timestamp_us = stepped;

		let first = monitor.poll_all();
		assert_eq!(first[0].timestamp_us, stepped + 1);

		thread::sleep(Duration::from_millis(40));
		// 20 J at 1/16384 J per count
		fake_msr_tree(dir.path(), 327_680);

		let second = monitor.poll_all();
		assert_eq!(second[0].timestamp_us, stepped + 2);
		assert!(second[0].power_watts > 0.0);
		assert!(second[0].power_watts < 1000.0, "reported {} W", second[0].power_watts);
	}

	#[test]
	fn test_missing_facility_is_fatal() {
		let dir = tempfile::tempdir().unwrap();
		let config = TelemetryConfig {
			msr_device_root: dir.path().to_path_buf(),
			load_module: false,
			..Default::default()
		};

		assert!(matches!(
			SystemMonitor::new(config),
			Err(TelemetryError::UnavailableFacility(_))
		));
	}
}

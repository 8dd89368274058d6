pub mod config;
pub mod constants;
pub mod decode;
pub mod display;
pub mod dvfs;
pub mod energy;
pub mod error;
pub mod metrics;
pub mod monitor;
pub mod reader;
pub mod simd;
pub mod smart;
pub mod topology;
pub mod util;

use std::thread;
use std::time::Duration;

use tracing::{info, warn};

pub use crate::config::TelemetryConfig;
pub use crate::dvfs::{DvfsConfig, FrequencyController, compute_target};
pub use crate::energy::EnergyAccumulator;
pub use crate::error::{Result, TelemetryError};
pub use crate::metrics::CpuMetrics;
pub use crate::monitor::{PollReport, SkippedCpu, SystemMonitor};
pub use crate::reader::CpuMetricsReader;
pub use crate::simd::{CacheAlignedBuffer, SimdLevel, VectorKernels};
pub use crate::smart::SmartAttributes;
pub use crate::topology::{CpuTopology, NumaNode};
pub use crate::util::msr::{MsrDevice, RegisterRead};

use crate::display::{display_sample, display_smart, display_topology, format_metrics_line};
use crate::util::cpu::CpuUtilization;

/// Frequency policy used for the recommendations printed by the demo
pub const DEMO_DVFS_CONFIG: DvfsConfig = DvfsConfig {
	min_frequency_mhz: 1000,
	max_frequency_mhz: 4500,
	target_temperature_celsius: 75.0,
	power_limit_watts: 65.0,
};

/// Polls every CPU a few times and prints metrics, DVFS targets and topology
///
/// Frequency targets are only printed, never written to cpufreq. When
/// `disk` is given its S.M.A.R.T. attributes are shown as well; failing to
/// read them is reported but does not fail the run.
pub fn run_telemetry_demo(config: TelemetryConfig, disk: Option<&str>) -> Result<()> {
	let mut monitor = SystemMonitor::new(config)?;
	let kernels = VectorKernels::new();

	println!(
		"Monitoring {} of {} CPUs every {} ms (SIMD: {})",
		monitor.open_cpus().len(),
		monitor.cpu_count(),
		constants::DATA_COLLECTION_INTERVAL_MS,
		kernels.level().as_str()
	);
	println!();

	let mut utilization = CpuUtilization::new(&monitor.config().proc_stat_path);
	if let Err(e) = utilization.update() {
		warn!(error = %e, "CPU load unavailable, DVFS recommendations assume idle CPUs");
	}

	for sample in 1..=constants::DEMO_SAMPLE_COUNT {
		thread::sleep(Duration::from_millis(constants::DATA_COLLECTION_INTERVAL_MS));

		if let Err(e) = utilization.update() {
			warn!(error = %e, "Failed to refresh CPU load");
		}

		let report = monitor.poll();
		let lines: Vec<String> = report
			.metrics
			.iter()
			.map(|metrics| {
				let load = utilization.load_percent(metrics.cpu_id).unwrap_or(0.0);
				let target = compute_target(load, metrics.temperature_celsius, &DEMO_DVFS_CONFIG).ok();
				format_metrics_line(metrics, target)
			})
			.collect();

		display_sample(sample, &lines).map_err(|e| TelemetryError::io("stdout", e))?;

		if !report.skipped.is_empty() {
			info!(sample, skipped = report.skipped.len(), "Some CPUs were not read");
		}
	}

	display_topology(monitor.topology()).map_err(|e| TelemetryError::io("stdout", e))?;

	if let Some(device) = disk {
		println!();
		match monitor.disk_health(device) {
			Ok(attrs) => display_smart(&attrs).map_err(|e| TelemetryError::io("stdout", e))?,
			Err(e) => eprintln!("Disk health unavailable for {}: {}", device, e),
		}
	}

	Ok(())
}

//! Telemetry configuration
//!
//! Every OS location the core touches is configurable so the whole engine can
//! run against a fabricated device/sysfs tree.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::constants::*;
use crate::error::Result;

/// Paths and helper programs used by the telemetry core
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
	/// Directory holding `<cpu>/msr` register devices
	#[serde(default = "default_msr_device_root")]
	pub msr_device_root: PathBuf,

	/// Base directory of the NUMA node topology
	#[serde(default = "default_numa_root")]
	pub numa_root: PathBuf,

	/// Directory holding `cpu<N>/cpufreq` control files
	#[serde(default = "default_cpufreq_root")]
	pub cpufreq_root: PathBuf,

	/// Kernel CPU statistics file used for load tracking
	#[serde(default = "default_proc_stat_path")]
	pub proc_stat_path: PathBuf,

	/// Privileged helper used to load the msr kernel module
	#[serde(default = "default_modprobe_program")]
	pub modprobe_program: String,

	/// Disk diagnostics utility
	#[serde(default = "default_smartctl_program")]
	pub smartctl_program: String,

	/// Whether a missing MSR device triggers a module load attempt
	#[serde(default = "default_load_module")]
	pub load_module: bool,

	/// Overrides the detected logical CPU count
	#[serde(default)]
	pub cpu_count: Option<usize>,

	/// Samples further apart than this re-seed the energy accumulator
	#[serde(default = "default_energy_max_gap_ms")]
	pub energy_max_gap_ms: u64,
}

fn default_msr_device_root() -> PathBuf {
	PathBuf::from(MSR_DEVICE_ROOT)
}

fn default_numa_root() -> PathBuf {
	PathBuf::from(NUMA_ROOT)
}

fn default_cpufreq_root() -> PathBuf {
	PathBuf::from(CPUFREQ_ROOT)
}

fn default_proc_stat_path() -> PathBuf {
	PathBuf::from(PROC_STAT_PATH)
}

fn default_modprobe_program() -> String {
	MODPROBE_PROGRAM.to_string()
}

fn default_smartctl_program() -> String {
	SMARTCTL_PROGRAM.to_string()
}

fn default_load_module() -> bool {
	true
}

fn default_energy_max_gap_ms() -> u64 {
	ENERGY_MAX_GAP_MS
}

impl Default for TelemetryConfig {
	fn default() -> Self {
		Self {
			msr_device_root: default_msr_device_root(),
			numa_root: default_numa_root(),
			cpufreq_root: default_cpufreq_root(),
			proc_stat_path: default_proc_stat_path(),
			modprobe_program: default_modprobe_program(),
			smartctl_program: default_smartctl_program(),
			load_module: default_load_module(),
			cpu_count: None,
			energy_max_gap_ms: default_energy_max_gap_ms(),
		}
	}
}

impl TelemetryConfig {
	/// Load configuration from `CPU_TELEMETRY_*` environment variables
	///
	/// Unset variables keep their defaults; malformed values are reported
	/// as `InvalidConfig`.
	pub fn load() -> Result<Self> {
		let config = config::Config::builder()
			.add_source(config::Environment::with_prefix("CPU_TELEMETRY").try_parsing(true))
			.build()?;

		Ok(config.try_deserialize()?)
	}

	/// Maximum gap between energy samples before the accumulator re-seeds
	pub fn energy_max_gap(&self) -> Duration {
		Duration::from_millis(self.energy_max_gap_ms)
	}
}

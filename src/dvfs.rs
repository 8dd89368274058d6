//! Dynamic voltage and frequency scaling
//!
//! [`compute_target`] is a pure decision function over load, temperature and
//! a caller-supplied [`DvfsConfig`]. Applying the result is a separate,
//! privileged write through cpufreq, so the decision never depends on
//! whether the write succeeds.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, TelemetryError};

/// Frequency scaling limits for one policy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DvfsConfig {
	pub min_frequency_mhz: u64,
	pub max_frequency_mhz: u64,

	/// Above this temperature the target is scaled down
	pub target_temperature_celsius: f64,

	/// Package power budget; validated but not part of the frequency decision
	pub power_limit_watts: f64,
}

impl DvfsConfig {
	/// Rejects a config with `min > max` or out-of-range targets
	pub fn validate(&self) -> Result<()> {
		if self.min_frequency_mhz == 0 {
			return Err(TelemetryError::InvalidConfig("min_frequency_mhz must be positive".into()));
		}

		if self.min_frequency_mhz > self.max_frequency_mhz {
			return Err(TelemetryError::InvalidConfig(format!(
				"min_frequency_mhz ({}) exceeds max_frequency_mhz ({})",
				self.min_frequency_mhz, self.max_frequency_mhz
			)));
		}

		if !self.target_temperature_celsius.is_finite() || self.target_temperature_celsius <= 0.0 {
			return Err(TelemetryError::InvalidConfig(format!(
				"target_temperature_celsius must be a positive number, got {}",
				self.target_temperature_celsius
			)));
		}

		if !self.power_limit_watts.is_finite() || self.power_limit_watts <= 0.0 {
			return Err(TelemetryError::InvalidConfig(format!(
				"power_limit_watts must be a positive number, got {}",
				self.power_limit_watts
			)));
		}

		Ok(())
	}
}

/// Target frequency in MHz for the given load and temperature
///
/// Interpolates linearly between the config's min and max by
/// `load_percent / 100`. Above the target temperature the result is scaled
/// by `target / current`. The result is clamped to `[min, max]`; a malformed
/// config is rejected rather than clamped.
pub fn compute_target(load_percent: f64, temperature_celsius: f64, config: &DvfsConfig) -> Result<u64> {
	config.validate()?;

	if !(0.0..=100.0).contains(&load_percent) {
		return Err(TelemetryError::InvalidArgument(format!(
			"load_percent must be within [0, 100], got {}",
			load_percent
		)));
	}

	if !temperature_celsius.is_finite() {
		return Err(TelemetryError::InvalidArgument(format!(
			"temperature must be finite, got {}",
			temperature_celsius
		)));
	}

	let span = config.max_frequency_mhz - config.min_frequency_mhz;
	let mut target = config.min_frequency_mhz + (span as f64 * (load_percent / 100.0)) as u64;

	// Thermal throttling
	if temperature_celsius > config.target_temperature_celsius {
		let ratio = config.target_temperature_celsius / temperature_celsius;
		target = (target as f64 * ratio) as u64;
	}

	Ok(target.clamp(config.min_frequency_mhz, config.max_frequency_mhz))
}

/// Writes frequency requests through cpufreq `scaling_setspeed`
///
/// Requires root and the `userspace` governor. Writes to the same CPU are
/// serialized.
#[derive(Debug)]
pub struct FrequencyController {
	cpufreq_root: PathBuf,
	write_locks: Mutex<HashMap<usize, Arc<Mutex<()>>>>,
}

impl FrequencyController {
	pub fn new(cpufreq_root: impl Into<PathBuf>) -> Self {
		Self {
			cpufreq_root: cpufreq_root.into(),
			write_locks: Mutex::new(HashMap::new()),
		}
	}

	fn cpufreq_file(&self, cpu_id: usize, name: &str) -> PathBuf {
		self.cpufreq_root
			.join(format!("cpu{}", cpu_id))
			.join("cpufreq")
			.join(name)
	}

	fn lock_for(&self, cpu_id: usize) -> Arc<Mutex<()>> {
		let mut locks = self.write_locks.lock().unwrap_or_else(|e| e.into_inner());
		locks.entry(cpu_id).or_default().clone()
	}

	/// Requests `frequency_mhz` on `cpu_id`
	pub fn apply(&self, cpu_id: usize, frequency_mhz: u64) -> Result<()> {
		let path = self.cpufreq_file(cpu_id, "scaling_setspeed");
		let khz = frequency_mhz
			.checked_mul(1000)
			.ok_or_else(|| TelemetryError::InvalidArgument(format!("frequency {} MHz overflows kHz", frequency_mhz)))?;

		let lock = self.lock_for(cpu_id);
		let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

		write_control_file(&path, &khz.to_string())?;
		info!(cpu_id, frequency_mhz, "Frequency request written");
		Ok(())
	}

	/// Active cpufreq governor of `cpu_id`
	pub fn current_governor(&self, cpu_id: usize) -> Result<String> {
		let path = self.cpufreq_file(cpu_id, "scaling_governor");
		let governor = fs::read_to_string(&path).map_err(|e| TelemetryError::io(&path, e))?;
		Ok(governor.trim().to_string())
	}
}

fn write_control_file(path: &Path, value: &str) -> Result<()> {
	debug!(path = %path.display(), value, "Writing cpufreq control file");
	// Control files must already exist; never create them
	let mut file = fs::OpenOptions::new()
		.write(true)
		.truncate(true)
		.open(path)
		.map_err(|e| TelemetryError::io(path, e))?;

	std::io::Write::write_all(&mut file, value.as_bytes()).map_err(|e| TelemetryError::io(path, e))
}

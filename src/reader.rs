use crate::constants::*;
use crate::decode::{decode_energy_unit, decode_frequency, decode_temperature};
use crate::energy::EnergyAccumulator;
use crate::error::Result;
use crate::metrics::CpuMetrics;
use crate::util::monotonic_us;
use crate::util::msr::RegisterRead;

/// Reads temperature, frequency and package power for one logical CPU
///
/// Owns the register handle and the energy accumulator of its CPU. The
/// temperature and frequency reads are pure; [`snapshot`](Self::snapshot)
/// takes `&mut self` because it advances the power sampling state.
#[derive(Debug)]
pub struct CpuMetricsReader<R: RegisterRead> {
	registers: R,
	energy: EnergyAccumulator,
}

impl<R: RegisterRead> CpuMetricsReader<R> {
	/// Creates a reader, reading the RAPL energy unit once up front
	pub fn new(registers: R, max_gap_us: u64) -> Result<Self> {
		let power_unit = registers.read(INTEL_POWER_UNIT_MSR)?;
		let energy = EnergyAccumulator::new(decode_energy_unit(power_unit), max_gap_us);

		Ok(Self { registers, energy })
	}

	pub fn cpu_id(&self) -> usize {
		self.registers.cpu_id()
	}

	pub fn registers(&self) -> &R {
		&self.registers
	}

	/// Current temperature in degrees Celsius
	pub fn temperature(&self) -> Result<f64> {
		let target = self.registers.read(MSR_TEMPERATURE_TARGET)?;
		let status = self.registers.read(IA32_THERM_STATUS_MSR)?;
		Ok(decode_temperature(status, target))
	}

	/// Current frequency in MHz
	pub fn frequency(&self) -> Result<u64> {
		let perf_status = self.registers.read(IA32_PERF_STATUS_MSR)?;
		Ok(decode_frequency(perf_status))
	}

	/// Average package power since the previous call, 0.0 when seeding
	///
	/// `monotonic_now_us` is the reading time on a monotonic clock.
	pub fn package_power(&mut self, monotonic_now_us: u64) -> Result<f64> {
		let raw = self.registers.read(INTEL_PKG_ENERGY_MSR)?;
		self.energy.sample(raw, monotonic_now_us)
	}

	/// Reads a full metrics snapshot stamped with wall-clock `timestamp_us`
	///
	/// Power is averaged over the process monotonic clock, so wall-clock
	/// steps only move the stamp.
	pub fn snapshot(&mut self, timestamp_us: u64) -> Result<CpuMetrics> {
		self.snapshot_at(timestamp_us, monotonic_us())
	}

	/// Like [`snapshot`](Self::snapshot) with an explicit monotonic time
	///
	/// A failed read resets the energy accumulator so the next successful
	/// snapshot seeds instead of averaging across the gap.
	pub fn snapshot_at(&mut self, timestamp_us: u64, monotonic_now_us: u64) -> Result<CpuMetrics> {
		let result = self.read_all(timestamp_us, monotonic_now_us);
		if result.is_err() {
			self.energy.reset();
		}
		result
	}

	fn read_all(&mut self, timestamp_us: u64, monotonic_now_us: u64) -> Result<CpuMetrics> {
		let temperature_celsius = self.temperature()?;
		let frequency_mhz = self.frequency()?;
		let power_watts = self.package_power(monotonic_now_us)?;

		Ok(CpuMetrics {
			cpu_id: self.cpu_id(),
			temperature_celsius,
			frequency_mhz,
			voltage_volts: 0.0,
			power_watts,
			timestamp_us,
		})
	}
}

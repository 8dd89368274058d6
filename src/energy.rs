use crate::constants::MIN_SAMPLE_INTERVAL_US;
use crate::error::{Result, TelemetryError};
use crate::util::energy_counter_delta;

/// Converts successive RAPL energy counter readings into average power
///
/// The accumulator starts unseeded: the first sample, and the first sample
/// after [`reset`](Self::reset) or after a gap longer than `max_gap_us`,
/// only records the reading and reports 0.0 W. Every later sample reports the
/// average power since the previous one, correcting for one 32-bit wrap.
///
/// Sample times must come from a monotonic clock such as
/// [`monotonic_us`](crate::util::monotonic_us).
#[derive(Debug, Clone)]
pub struct EnergyAccumulator {
	/// Joules per counter increment
	energy_unit: f64,

	/// Samples further apart than this re-seed
	max_gap_us: u64,

	/// Previous (raw counter, timestamp in us), if seeded
	last: Option<(u64, u64)>,
}

impl EnergyAccumulator {
	pub fn new(energy_unit: f64, max_gap_us: u64) -> Self {
		Self {
			energy_unit,
			max_gap_us,
			last: None,
		}
	}

	pub fn energy_unit(&self) -> f64 {
		self.energy_unit
	}

	pub fn is_seeded(&self) -> bool {
		self.last.is_some()
	}

	/// Drops the stored sample so the next one seeds again
	pub fn reset(&mut self) {
		self.last = None;
	}

	/// Records a raw counter reading taken at monotonic time `now_us` and
	/// returns watts
	///
	/// An interval shorter than `MIN_SAMPLE_INTERVAL_US`, or a backwards one,
	/// is a `SampleInterval` error. The stored sample is overwritten on every
	/// call, including the failing ones.
	pub fn sample(&mut self, raw_energy: u64, now_us: u64) -> Result<f64> {
		let current = raw_energy & crate::constants::ENERGY_COUNTER_MASK;
		let previous = self.last.replace((current, now_us));

		let Some((previous, previous_us)) = previous else {
			return Ok(0.0);
		};

		let elapsed_us = now_us.saturating_sub(previous_us);
		if elapsed_us < MIN_SAMPLE_INTERVAL_US {
			return Err(TelemetryError::SampleInterval { elapsed_us });
		}

		if elapsed_us > self.max_gap_us {
			// The counter may have wrapped more than once; start over
			return Ok(0.0);
		}

		let joules = energy_counter_delta(previous, current) as f64 * self.energy_unit;
		let seconds = elapsed_us as f64 / 1e6;

		Ok(joules / seconds)
	}
}

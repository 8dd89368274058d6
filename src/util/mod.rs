pub mod cpu;
pub mod msr;

use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crate::constants::ENERGY_COUNTER_MASK;

/// Difference between two readings of the 32-bit RAPL energy counter
///
/// When `energy_end` is below `energy_start` the counter has wrapped once and
/// the distance is taken through the top of the counter range.
///
/// # Arguments
///
/// * `energy_start` - Earlier counter reading
/// * `energy_end` - Later counter reading
pub const fn energy_counter_delta(energy_start: u64, energy_end: u64) -> u64 {
	let energy_start = energy_start & ENERGY_COUNTER_MASK;
	let energy_end = energy_end & ENERGY_COUNTER_MASK;

	if energy_end < energy_start {
		// Handle counter wrap-around
		(ENERGY_COUNTER_MASK - energy_start) + energy_end
	} else {
		energy_end - energy_start
	}
}

/// Wall-clock time in microseconds since the Unix epoch
pub fn timestamp_us() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_micros() as u64)
		.unwrap_or(0)
}

/// Monotonic microseconds since the first call in this process
///
/// Unaffected by wall-clock steps; use it for intervals, not for stamps.
pub fn monotonic_us() -> u64 {
	static EPOCH: OnceLock<Instant> = OnceLock::new();
	let epoch = *EPOCH.get_or_init(Instant::now);
	u64::try_from(epoch.elapsed().as_micros()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_delta_without_wrap() {
		assert_eq!(energy_counter_delta(100, 350), 250);
		assert_eq!(energy_counter_delta(7, 7), 0);
	}

	#[test]
	fn test_delta_with_wrap() {
		assert_eq!(energy_counter_delta(0xFFFF_FF00, 0x10), (0xFFFF_FFFF - 0xFFFF_FF00) + 0x10);
	}

	#[test]
	fn test_monotonic_clock_never_goes_back() {
		let a = monotonic_us();
		std::thread::sleep(std::time::Duration::from_millis(2));
		let b = monotonic_us();
		assert!(b >= a + 2_000);
	}

	#[test]
	fn test_delta_ignores_reserved_high_bits() {
		assert_eq!(energy_counter_delta(0xAB_0000_0010, 0xCD_0000_0020), 0x10);
	}
}

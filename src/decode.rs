//! Bit-level decoding of Intel thermal, performance and RAPL registers
//!
//! These are pure functions over raw register values; the vendor-defined bit
//! positions are reproduced exactly and no plausibility checks are applied.

use crate::constants::BUS_FREQUENCY_MHZ;

/// Decodes the core temperature in degrees Celsius
///
/// `MSR_TEMPERATURE_TARGET` bits [23:16] hold TjMax and `IA32_THERM_STATUS`
/// bits [22:16] hold the digital readout, the distance below TjMax. On CPUs
/// without these fields the result can be implausible.
pub const fn decode_temperature(therm_status: u64, temperature_target: u64) -> f64 {
	let tj_max = (temperature_target >> 16) & 0xFF;
	let digital_readout = (therm_status >> 16) & 0x7F;

	tj_max as f64 - digital_readout as f64
}

/// Decodes the current core frequency in MHz from `IA32_PERF_STATUS`
///
/// Bits [15:8] hold the current ratio, multiplied by a fixed 100 MHz bus clock.
pub const fn decode_frequency(perf_status: u64) -> u64 {
	let multiplier = (perf_status >> 8) & 0xFF;
	multiplier * BUS_FREQUENCY_MHZ
}

/// Energy status unit in joules per counter increment
///
/// Bits [12:8] of `MSR_RAPL_POWER_UNIT` give the exponent: one count is
/// `1 / 2^ESU` joules.
pub fn decode_energy_unit(power_unit: u64) -> f64 {
	let exponent = ((power_unit >> 8) & 0x1F) as i32;
	1.0 / 2f64.powi(exponent)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_temperature_is_tjmax_minus_readout() {
		let target = 100u64 << 16;
		let status = 20u64 << 16;
		assert_eq!(decode_temperature(status, target), 80.0);
	}

	#[test]
	fn test_temperature_masks_neighbouring_bits() {
		// Bit 23 of the status register is outside the 7-bit readout field
		let target = (0xFFu64 << 24) | (95 << 16) | 0xFFFF;
		let status = (1u64 << 31) | (1 << 23) | (15 << 16) | 0xFFFF;
		assert_eq!(decode_temperature(status, target), 80.0);
	}

	#[test]
	fn test_frequency_uses_ratio_field() {
		assert_eq!(decode_frequency(0x24 << 8), 3600);
		assert_eq!(decode_frequency((0x24 << 8) | 0xFF | (0x7 << 16)), 3600);
		assert_eq!(decode_frequency(0), 0);
	}

	#[test]
	fn test_energy_unit() {
		// Typical Intel client part: ESU = 14 -> 61 uJ per count
		let unit = decode_energy_unit(0x000A_0E03);
		assert_eq!(unit, 1.0 / 16384.0);
		assert_eq!(decode_energy_unit(0), 1.0);
	}
}

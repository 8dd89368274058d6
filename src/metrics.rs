use serde::Serialize;

/// Snapshot of one logical CPU's hardware state
///
/// Produced once per poll per CPU. `power_watts` is package power averaged
/// since the previous poll and is 0.0 on the first poll of a CPU.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CpuMetrics {
	/// Logical CPU id (0-based)
	pub cpu_id: usize,

	/// Core temperature in degrees Celsius
	pub temperature_celsius: f64,

	/// Current core frequency in MHz
	pub frequency_mhz: u64,

	/// Core voltage; not read from hardware, always 0.0
	pub voltage_volts: f64,

	/// Average package power in watts
	pub power_watts: f64,

	/// Microseconds since the Unix epoch
	pub timestamp_us: u64,
}

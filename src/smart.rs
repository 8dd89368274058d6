//! Best-effort disk health from `smartctl -A`
//!
//! The output format differs between ATA and NVMe devices and between
//! smartmontools releases, so every attribute is optional. A missing tool or
//! output without any known field is an `ExternalTool` error.

use std::io;
use std::process::Command;

use serde::Serialize;
use tracing::debug;

use crate::error::{Result, TelemetryError};

const BYTES_PER_LBA: u64 = 512;
const BYTES_PER_NVME_DATA_UNIT: u64 = 512_000;

/// S.M.A.R.T. attributes of one storage device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SmartAttributes {
	pub device_path: String,
	pub power_on_hours: Option<u64>,
	pub temperature_celsius: Option<u64>,
	pub total_bytes_written: Option<u64>,
	pub total_bytes_read: Option<u64>,
	/// Remaining endurance, 100 minus the NVMe "Percentage Used"
	pub health_percentage: Option<u8>,
	pub wear_leveling_count: Option<u64>,
}

impl SmartAttributes {
	/// Whether no attribute could be read
	pub fn is_empty(&self) -> bool {
		self.power_on_hours.is_none()
			&& self.temperature_celsius.is_none()
			&& self.total_bytes_written.is_none()
			&& self.total_bytes_read.is_none()
			&& self.health_percentage.is_none()
			&& self.wear_leveling_count.is_none()
	}
}

/// Runs `<program> -A <device>` and parses its output
///
/// The call blocks until the tool exits; callers that need a bound should run
/// it under their own timeout.
pub fn read_smart_attributes(program: &str, device: &str) -> Result<SmartAttributes> {
	let output = Command::new(program).arg("-A").arg(device).output().map_err(|e| {
		if e.kind() == io::ErrorKind::NotFound {
			TelemetryError::tool(program, "not installed (install smartmontools)")
		} else {
			TelemetryError::tool(program, e.to_string())
		}
	})?;

	let stdout = String::from_utf8_lossy(&output.stdout);

	// smartctl encodes warnings in its exit bits while still printing data
	if !output.status.success() && stdout.trim().is_empty() {
		return Err(TelemetryError::tool(
			program,
			format!("exited with {}: {}", output.status, String::from_utf8_lossy(&output.stderr).trim()),
		));
	}

	let attrs = parse_smartctl_output(device, &stdout);
	if attrs.is_empty() {
		return Err(TelemetryError::tool(program, format!("no known attributes for {}", device)));
	}

	debug!(device, ?attrs, "Read S.M.A.R.T. attributes");
	Ok(attrs)
}

/// Parses ATA attribute table rows and NVMe `Key: value` lines
pub fn parse_smartctl_output(device: &str, output: &str) -> SmartAttributes {
	let mut attrs = SmartAttributes {
		device_path: device.to_string(),
		..Default::default()
	};

	for line in output.lines() {
		if let Some((name, raw)) = parse_ata_row(line) {
			match name {
				"Power_On_Hours" => attrs.power_on_hours = leading_number(raw),
				"Temperature_Celsius" | "Airflow_Temperature_Cel" => {
					if attrs.temperature_celsius.is_none() {
						attrs.temperature_celsius = leading_number(raw);
					}
				},
				"Total_LBAs_Written" => attrs.total_bytes_written = leading_bytes(raw, BYTES_PER_LBA),
				"Total_LBAs_Read" => attrs.total_bytes_read = leading_bytes(raw, BYTES_PER_LBA),
				"Wear_Leveling_Count" => attrs.wear_leveling_count = leading_number(raw),
				_ => {},
			}
			continue;
		}

		let Some((key, value)) = line.split_once(':') else {
			continue;
		};

		match key.trim() {
			"Power On Hours" => attrs.power_on_hours = leading_number(value),
			"Temperature" => attrs.temperature_celsius = leading_number(value),
			"Data Units Written" => attrs.total_bytes_written = leading_bytes(value, BYTES_PER_NVME_DATA_UNIT),
			"Data Units Read" => attrs.total_bytes_read = leading_bytes(value, BYTES_PER_NVME_DATA_UNIT),
			"Percentage Used" => {
				attrs.health_percentage = leading_number(value).map(|used| 100u64.saturating_sub(used) as u8)
			},
			_ => {},
		}
	}

	attrs
}

/// Splits an ATA attribute row into (attribute name, raw value text)
///
/// Rows have ten columns: ID, name, flag, value, worst, threshold, type,
/// updated, when-failed, raw value. The raw value may carry trailing text.
fn parse_ata_row(line: &str) -> Option<(&str, &str)> {
	let mut fields = line.split_whitespace();
	let id = fields.next()?;
	id.parse::<u16>().ok()?;
	let name = fields.next()?;

	let flag = fields.next()?;
	if !flag.starts_with("0x") {
		return None;
	}

	for _ in 0..6 {
		fields.next()?;
	}

	let raw = fields.next()?;
	Some((name, raw))
}

/// Parses the leading digits of `text`, ignoring thousands separators
fn leading_number(text: &str) -> Option<u64> {
	let digits: String = text
		.trim()
		.chars()
		.filter(|&c| c != ',')
		.take_while(|c| c.is_ascii_digit())
		.collect();

	digits.parse().ok()
}

/// Leading count times `unit`, `None` if unparsable or out of range
fn leading_bytes(text: &str, unit: u64) -> Option<u64> {
	leading_number(text)?.checked_mul(unit)
}

#[cfg(test)]
mod tests {
	use super::*;

	const ATA_OUTPUT: &str = "\
smartctl 7.3 2022-02-28 r5338 [x86_64-linux-6.1.0] (local build)
=== START OF READ SMART DATA SECTION ===
SMART Attributes Data Structure revision number: 1
ID# ATTRIBUTE_NAME          FLAG     VALUE WORST THRESH TYPE      UPDATED  WHEN_FAILED RAW_VALUE
  9 Power_On_Hours          0x0032   095   095   000    Old_age   Always       -       23456
177 Wear_Leveling_Count     0x0013   097   097   000    Pre-fail  Always       -       35
194 Temperature_Celsius     0x0022   064   045   000    Old_age   Always       -       36 (Min/Max 18/55)
241 Total_LBAs_Written      0x0032   099   099   000    Old_age   Always       -       1000
";

	const NVME_OUTPUT: &str = "\
=== START OF SMART DATA SECTION ===
SMART/Health Information (NVMe Log 0x02)
Critical Warning:                   0x00
Temperature:                        41 Celsius
Percentage Used:                    3%
Data Units Read:                    1,234 [631 MB]
Data Units Written:                 2,000 [1.02 GB]
Power On Hours:                     1,502
";

	#[test]
	fn test_parse_ata_table() {
		let attrs = parse_smartctl_output("/dev/sda", ATA_OUTPUT);
		assert_eq!(attrs.device_path, "/dev/sda");
		assert_eq!(attrs.power_on_hours, Some(23_456));
		assert_eq!(attrs.temperature_celsius, Some(36));
		assert_eq!(attrs.wear_leveling_count, Some(35));
		assert_eq!(attrs.total_bytes_written, Some(512_000));
		assert_eq!(attrs.total_bytes_read, None);
		assert_eq!(attrs.health_percentage, None);
	}

	#[test]
	fn test_parse_nvme_log() {
		let attrs = parse_smartctl_output("/dev/nvme0", NVME_OUTPUT);
		assert_eq!(attrs.power_on_hours, Some(1_502));
		assert_eq!(attrs.temperature_celsius, Some(41));
		assert_eq!(attrs.health_percentage, Some(97));
		assert_eq!(attrs.total_bytes_read, Some(1_234 * 512_000));
		assert_eq!(attrs.total_bytes_written, Some(2_000 * 512_000));
	}

	#[test]
	fn test_oversized_counters_are_unavailable() {
		let nvme = parse_smartctl_output(
			"/dev/nvme0",
			"Data Units Written: 99,999,999,999,999,999 [51.2 EB]\nData Units Read: 99999999999999999999999\nPower On Hours: 7\n",
		);
		assert_eq!(nvme.total_bytes_written, None);
		assert_eq!(nvme.total_bytes_read, None);
		assert_eq!(nvme.power_on_hours, Some(7));

		let ata = parse_smartctl_output(
			"/dev/sda",
			"241 Total_LBAs_Written      0x0032   099   099   000    Old_age   Always       -       18446744073709551615\n",
		);
		assert_eq!(ata.total_bytes_written, None);
	}

	#[test]
	fn test_unrelated_output_is_empty() {
		let attrs = parse_smartctl_output("/dev/sdz", "Smartctl open device: /dev/sdz failed: No such device\n");
		assert!(attrs.is_empty());
	}

	#[test]
	fn test_missing_tool_is_reported() {
		let err = read_smart_attributes("/nonexistent/smartctl", "/dev/sda").unwrap_err();
		assert!(matches!(err, TelemetryError::ExternalTool { .. }));
	}
}

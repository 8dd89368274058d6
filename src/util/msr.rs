use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{info, warn};

use crate::error::{Result, TelemetryError};

/// Source of raw 64-bit register values for one logical CPU
pub trait RegisterRead {
	/// Logical CPU the registers belong to
	fn cpu_id(&self) -> usize;

	/// Reads the register at `address`
	fn read(&self, address: u32) -> Result<u64>;
}

/// Open handle on the MSR device of one logical CPU
///
/// The device file is held for the lifetime of the value and closed when it
/// is dropped, on every path. The handle can be moved but not cloned.
#[derive(Debug)]
pub struct MsrDevice {
	cpu_id: usize,
	path: PathBuf,
	file: File,
}

impl MsrDevice {
	/// Opens `/dev/cpu/<cpu_id>/msr`
	pub fn open(cpu_id: usize) -> Result<Self> {
		Self::open_at(Path::new(crate::constants::MSR_DEVICE_ROOT), cpu_id)
	}

	/// Opens `<root>/<cpu_id>/msr`
	pub fn open_at(root: &Path, cpu_id: usize) -> Result<Self> {
		let path = device_path(root, cpu_id);

		match File::open(&path) {
			Ok(file) => Ok(Self { cpu_id, path, file }),
			Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
				Err(TelemetryError::PermissionDenied { path })
			},
			Err(source) => Err(TelemetryError::DeviceOpen { cpu_id, path, source }),
		}
	}

	/// Path of the underlying device file
	pub fn path(&self) -> &Path {
		&self.path
	}
}

impl RegisterRead for MsrDevice {
	fn cpu_id(&self) -> usize {
		self.cpu_id
	}

	/// Reads exactly 8 bytes at offset `address`; a short read is an error
	fn read(&self, address: u32) -> Result<u64> {
		let mut buf = [0u8; 8];

		let read = self
			.file
			.read_at(&mut buf, u64::from(address))
			.map_err(|e| TelemetryError::RegisterRead {
				cpu_id: self.cpu_id,
				address,
				message: e.to_string(),
			})?;

		if read != buf.len() {
			return Err(TelemetryError::RegisterRead {
				cpu_id: self.cpu_id,
				address,
				message: format!("short read ({} of {} bytes)", read, buf.len()),
			});
		}

		Ok(u64::from_ne_bytes(buf))
	}
}

/// Location of the MSR device of one CPU below `root`
pub fn device_path(root: &Path, cpu_id: usize) -> PathBuf {
	root.join(cpu_id.to_string()).join("msr")
}

/// Whether the msr driver is loaded, probed through the device of CPU 0
pub fn facility_available(root: &Path) -> bool {
	device_path(root, 0).exists()
}

/// Makes sure the MSR devices exist, loading the kernel module if allowed
///
/// Runs `<modprobe> msr` at most once and re-probes afterwards.
pub fn ensure_facility(root: &Path, modprobe: &str, load_module: bool) -> Result<()> {
	if facility_available(root) {
		return Ok(());
	}

	if !load_module {
		return Err(TelemetryError::UnavailableFacility(format!(
			"{} not found and module loading is disabled; run 'sudo modprobe msr'",
			device_path(root, 0).display()
		)));
	}

	warn!(program = modprobe, "MSR module not loaded, attempting to load it");

	match Command::new(modprobe).arg("msr").status() {
		Ok(status) if status.success() && facility_available(root) => {
			info!("MSR module loaded");
			Ok(())
		},
		Ok(status) => Err(TelemetryError::UnavailableFacility(format!(
			"'{} msr' exited with {}; run 'sudo modprobe msr' as root",
			modprobe, status
		))),
		Err(e) => Err(TelemetryError::UnavailableFacility(format!(
			"failed to run '{} msr': {}; run 'sudo modprobe msr' as root",
			modprobe, e
		))),
	}
}

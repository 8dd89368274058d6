//! Error types for the telemetry core
//!
//! Construction-time absence of the MSR facility is the only fatal error.
//! Everything else describes the failure of a single CPU, NUMA node or
//! external tool call and is meant to be logged and skipped by the caller.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Main error type for telemetry operations
#[derive(Error, Debug)]
pub enum TelemetryError {
	/// The MSR device is missing and the kernel module could not be loaded
	#[error("MSR facility unavailable: {0}")]
	UnavailableFacility(String),

	/// A privileged path was accessed without the required rights
	#[error("Permission denied: {path} (root privileges required)")]
	PermissionDenied { path: PathBuf },

	/// The register device of one CPU could not be opened
	#[error("Failed to open {path} for CPU {cpu_id}: {source}. Ensure 'modprobe msr' has been run and you have root privileges")]
	DeviceOpen {
		cpu_id: usize,
		path: PathBuf,
		#[source]
		source: io::Error,
	},

	/// A positioned register read failed or came back short
	#[error("Failed to read MSR {address:#x} on CPU {cpu_id}: {message}")]
	RegisterRead { cpu_id: usize, address: u32, message: String },

	/// A topology file was missing or malformed
	#[error("Failed to parse topology file '{path}': {message}")]
	TopologyParse { path: PathBuf, message: String },

	/// An external diagnostics tool was missing, failed, or produced unusable output
	#[error("External tool '{tool}' failed: {message}")]
	ExternalTool { tool: String, message: String },

	/// Caller-supplied configuration is malformed
	#[error("Invalid configuration: {0}")]
	InvalidConfig(String),

	/// Caller-supplied argument is out of range
	#[error("Invalid argument: {0}")]
	InvalidArgument(String),

	/// Two energy samples were taken too close together to compute power
	#[error("Energy sample interval too short ({elapsed_us} us)")]
	SampleInterval { elapsed_us: u64 },

	/// A system call not tied to any file failed
	#[error("{call} failed: {source}")]
	Syscall {
		call: &'static str,
		#[source]
		source: io::Error,
	},

	/// I/O error on a specific path
	#[error("I/O error at '{path}': {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: io::Error,
	},
}

impl TelemetryError {
	/// Create an I/O error with path context, promoting permission failures
	pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
		let path = path.into();
		if source.kind() == io::ErrorKind::PermissionDenied {
			Self::PermissionDenied { path }
		} else {
			Self::Io { path, source }
		}
	}

	/// Create an external tool error
	pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
		Self::ExternalTool {
			tool: tool.into(),
			message: message.into(),
		}
	}

	/// Check if this error is a permission issue
	pub fn is_permission_error(&self) -> bool {
		match self {
			Self::PermissionDenied { .. } => true,
			Self::DeviceOpen { source, .. } | Self::Io { source, .. } | Self::Syscall { source, .. } => {
				source.kind() == io::ErrorKind::PermissionDenied
			},
			_ => false,
		}
	}
}

impl From<config::ConfigError> for TelemetryError {
	fn from(err: config::ConfigError) -> Self {
		TelemetryError::InvalidConfig(err.to_string())
	}
}

/// Result type alias for telemetry operations
pub type Result<T> = std::result::Result<T, TelemetryError>;

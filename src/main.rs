use std::process::ExitCode;

use cpu_telemetry::{TelemetryConfig, run_telemetry_demo};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
		.with_writer(std::io::stderr)
		.init();

	let disk = std::env::args().nth(1);

	let result = TelemetryConfig::load().and_then(|config| run_telemetry_demo(config, disk.as_deref()));

	match result {
		Ok(()) => ExitCode::SUCCESS,
		Err(e) => {
			eprintln!("Error: {}", e);
			if e.is_permission_error() {
				eprintln!("Reading MSRs requires root privileges (try running with sudo)");
			}
			ExitCode::FAILURE
		},
	}
}

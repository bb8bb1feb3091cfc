//! Handling listing all the serial devices available on this machine.

use crate::exit_codes::PORTS_FAILED_ENUMERATION;
use miette::Report;
use serial_gateway::available_ports;
use tracing::{error, info};

/// List every serial device, separated by spaces, on stdout.
///
/// Logs always go to stderr, so the output here can be used directly in
/// scripts.
pub fn handle_ports(use_json: bool) {
	let ports = match available_ports() {
		Ok(ports) => ports,
		Err(cause) => {
			if use_json {
				error!(
					id = "sergw::ports::could_not_enumerate_ports",
					?cause,
					"failed to enumerate serial-ports",
				);
			} else {
				error!("\n{:?}", Report::new(cause).wrap_err("Failed to list ports"));
			}

			std::process::exit(PORTS_FAILED_ENUMERATION);
		}
	};

	if use_json {
		info!(
			id = "sergw::ports::found_ports",
			count = ports.len(),
			ports = ?ports,
			"found serial ports",
		);
	} else if ports.is_empty() {
		info!("Your OS reported no serial ports.");
	}

	println!("{}", ports.join(" "));
}

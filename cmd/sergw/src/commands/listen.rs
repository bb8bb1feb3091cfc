//! Run the gateway between a serial device, and TCP clients.

use crate::{
	exit_codes::{GATEWAY_FAILURE, NO_SERIAL_PORT_SPECIFIED},
	knobs::{cli::CliArguments, env::SERIAL_PORT},
	utils::{add_context_to, shutdown_signal},
};
use clap::CommandFactory;
use miette::{miette, Report};
use serial_gateway::{run_gateway, LinkConfiguration};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Run the gateway until we're told to shutdown.
///
/// ## Panics
///
/// This exits the process when no serial device was specified, or the
/// gateway fails to start.
pub async fn handle_listen(
	use_json: bool,
	serial_port: Option<String>,
	baud: u32,
	host: String,
	verbose: bool,
) {
	let Some(device_path) = serial_port.or_else(|| SERIAL_PORT.clone()) else {
		if use_json {
			error!(
				id = "sergw::listen::serial_port_required",
				"Serial port is required for listen command",
			);
		} else {
			error!(
				"\n{:?}",
				add_context_to(
					miette!("Serial port is required for listen command"),
					[
						miette!("You can specify the serial device with the cli argument `--serial`"),
						miette!("You can specify the serial device with the environment variable `SERGW_SERIAL_PORT`"),
						miette!(
							help = "Use `sergw ports` to see every serial device on this machine.",
							"Run `sergw ports` to list serial devices.",
						),
					]
					.into_iter(),
				),
			);
		}
		eprintln!("{}", listen_usage());

		std::process::exit(NO_SERIAL_PORT_SPECIFIED);
	};

	let cancel = CancellationToken::new();
	{
		let cancel = cancel.clone();
		tokio::spawn(async move {
			let reason = shutdown_signal().await;
			if use_json {
				info!(id = "sergw::listen::shutdown", reason, "shutting down gracefully");
			} else {
				info!(reason, "shutting down gateway gracefully...");
			}
			cancel.cancel();
		});
	}

	let config = LinkConfiguration::new(device_path, baud).with_verbose(verbose);
	if let Err(cause) = run_gateway(config, &host, cancel).await {
		if use_json {
			error!(
				id = "sergw::listen::gateway_terminated",
				?cause,
				"Gateway terminated",
			);
		} else {
			error!("\n{:?}", Report::new(cause).wrap_err("Gateway terminated"));
		}

		std::process::exit(GATEWAY_FAILURE);
	}
}

/// The usage line for just the `listen` command.
fn listen_usage() -> String {
	let mut top_level = CliArguments::command();
	top_level.build();
	if let Some(listen) = top_level.find_subcommand_mut("listen") {
		return listen.render_usage().to_string();
	}
	top_level.render_usage().to_string()
}

#![allow(
	// I've always disliked this rule, most of the time imports are used WITHOUT
	// the module name, and the module name is only used in the top level import.
	//
	// Where this becomes significantly more helpful to read as it's out of
	// context.
	clippy::module_name_repetitions,
)]

pub mod commands;
pub mod exit_codes;
pub mod knobs;
pub mod utils;

use crate::{
	commands::{handle_listen, handle_ports},
	exit_codes::{
		ARGUMENT_PARSING_FAILURE, LOGGING_HANDLER_INSTALL_FAILURE, NO_ARGUMENT_SPECIFIED_FAILURE,
	},
	knobs::{
		cli::{CliArguments, Subcommands},
		env::USE_JSON_OUTPUT,
	},
};
use clap::{error::ErrorKind as ClapErrorKind, CommandFactory, Parser};
use log::install_logging_handlers;
use miette::miette;
use tracing::{error, info};

/// Identifies this service in logs shared with other services.
const SERVICE_ID: &str = "sergw";

#[tokio::main]
async fn main() {
	let (argv, use_json) = bootstrap_cli();

	let Some(sub_command) = argv.commands else {
		if use_json {
			error!(
				id = "sergw::cli::no_command",
				"no subcommand was specified, expected one of `ports`, or `listen`",
			);
		}
		eprintln!("{}", CliArguments::command().render_long_help());
		std::process::exit(NO_ARGUMENT_SPECIFIED_FAILURE);
	};

	info!(
		service_id = SERVICE_ID,
		command = sub_command.name(),
		"SerGW starting",
	);

	match sub_command {
		Subcommands::Ports {} => handle_ports(use_json),
		Subcommands::Listen {
			serial_port,
			baud,
			host,
			verbose,
		} => {
			handle_listen(use_json, serial_port, baud, host, verbose).await;
		}
	}
}

fn bootstrap_cli() -> (CliArguments, bool) {
	let args_opt = CliArguments::try_parse();

	let use_json_cli = args_opt.as_ref().map_or_else(
		|_error| {
			// Try to identify if the user is wanting to use JSON.
			std::env::args().any(|arg| arg.as_str() == "-j" || arg.as_str() == "--json")
		},
		|args| args.json,
	);
	let use_json = *USE_JSON_OUTPUT || use_json_cli;
	let verbose = args_opt
		.as_ref()
		.ok()
		.and_then(|args| args.commands.as_ref())
		.is_some_and(Subcommands::is_verbose);

	// Help, and version output aren't failures, let clap print them as is.
	if let Err(cause) = args_opt.as_ref() {
		if matches!(
			cause.kind(),
			ClapErrorKind::DisplayHelp | ClapErrorKind::DisplayVersion
		) {
			cause.exit();
		}
	}

	if let Err(cause) = install_logging_handlers(use_json, verbose) {
		// We have to use a custom panic script here, because logging isn't setup yet.
		if use_json {
			eprintln!(
				r#"{{"id": "sergw::logging::install_failure", "inner_display_error": "{}", "message": "Failed to install the logging handlers!"}}"#,
				format!("{cause:?}").replace('"', "\\\"")
			);
		} else {
			eprintln!("Failed to install the logging handler to setup logging:\n{cause:?}");
		}
		std::process::exit(LOGGING_HANDLER_INSTALL_FAILURE);
	}

	match args_opt {
		Ok(args) => (args, use_json),
		Err(cause) => {
			if use_json {
				error!(
					id = "sergw::cli::arg_parse_failure",
					error.kind = %cause.kind(),
					error.context = ?cause.context().map(|(kind, value)| format!("{kind}: {value}")).collect::<Vec<String>>(),
					error.rendered = %cause.render(),
					"Failed parsing CLI arguments"
				);
			} else {
				error!(
					"\n{:?}",
					miette!("Failed parsing CLI arguments!").wrap_err(cause),
				);
			}

			std::process::exit(ARGUMENT_PARSING_FAILURE);
		}
	}
}

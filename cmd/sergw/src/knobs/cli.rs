//! Defines the command line interface a.k.a. all the arguments & flags.

use clap::Parser;
use serial_gateway::config::{DEFAULT_BAUD_RATE, DEFAULT_TCP_HOST};

#[derive(Parser, Debug)]
#[command(about, author, name = "sergw", propagate_version = true, version)]
pub struct CliArguments {
	#[command(subcommand)]
	pub commands: Option<Subcommands>,
	#[arg(
		global = true,
		short = 'j',
		long = "json",
		help = "Ensures all logging comes out in JSON instead of text.",
		long_help = "Switch all logging to JSON for machine parsable output. Command output on stdout (like the list of ports) is unaffected."
	)]
	pub json: bool,
}

#[derive(Parser, Debug)]
pub enum Subcommands {
	/// List the serial devices available on this machine.
	#[command(name = "ports", visible_alias = "list")]
	Ports {},
	/// Share a serial device with any amount of TCP clients.
	#[command(name = "listen")]
	Listen {
		#[arg(
			short = 's',
			long = "serial",
			help = "The serial device to open (required).",
			long_help = "The path to the serial device to open (e.g. `/dev/ttyUSB0`, or `COM3`). This is required, but can also be set with the `SERGW_SERIAL_PORT` environment variable."
		)]
		serial_port: Option<String>,
		#[arg(
			short = 'b',
			long = "baud",
			default_value_t = DEFAULT_BAUD_RATE,
			help = "The baud rate to open the serial device with.",
			long_help = "The baud rate to open the serial device with, it is always opened as 8N1 without flow control."
		)]
		baud: u32,
		#[arg(
			long = "host",
			default_value = DEFAULT_TCP_HOST,
			help = "The TCP address to listen on.",
			long_help = "The TCP address (`ip:port`) to listen for clients on."
		)]
		host: String,
		#[arg(
			short = 'v',
			long = "verbose",
			help = "Log every chunk of data moving through the gateway.",
			long_help = "Log every chunk of data moving through the gateway, clients coming and going, and lower the default log level to debug."
		)]
		verbose: bool,
	},
}

impl Subcommands {
	/// If the user asked for verbose output, which has to be known before
	/// logging is setup.
	#[must_use]
	pub const fn is_verbose(&self) -> bool {
		matches!(self, Self::Listen { verbose: true, .. })
	}

	/// The name clap knows this subcommand by.
	#[must_use]
	pub const fn name(&self) -> &'static str {
		match self {
			Self::Ports {} => "ports",
			Self::Listen { .. } => "listen",
		}
	}
}

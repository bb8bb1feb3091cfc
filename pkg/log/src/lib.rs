#![doc = include_str!("../README.md")]

use miette::{miette, Context, IntoDiagnostic, Result};
use once_cell::sync::Lazy;
use std::{
	env::var as env_var,
	io::stderr,
	net::SocketAddr,
	sync::{Mutex, PoisonError},
};
use tracing::{debug, Subscriber};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
	fmt::layer as tracing_fmt_layer, prelude::*, registry as subscriber_registry,
	registry::LookupSpan, EnvFilter, Layer,
};

/// Check if we have actually initialized logging before.
static HAS_INITIALIZED_LOGGING: Lazy<Mutex<bool>> = Lazy::new(|| Mutex::new(false));

/// Determine if our logger will use ANSI escape codes.
///
/// This line is copied directly from tracing subscriber:
/// <https://github.com/tokio-rs/tracing/blob/07b490067c0e2af61f48a3d2afb85a20ab70ba95/tracing-subscriber/src/fmt/fmt_subscriber.rs#L697>
#[must_use]
pub fn will_ansi() -> bool {
	env_var("NO_COLOR").map_or(true, |v| v.is_empty())
}

/// The filter used when neither `RUST_LOG`, nor `SERGW_LOGGING` are set.
#[must_use]
pub fn default_filter(verbose: bool, console_enabled: bool) -> &'static str {
	if console_enabled {
		// tokio-console requires tokio/runtime to be at the trace level.
		if verbose {
			"debug,tokio=trace,runtime=trace"
		} else {
			"info,tokio=trace,runtime=trace"
		}
	} else if verbose {
		"debug"
	} else {
		"info"
	}
}

/// Install all the logging configuration needed for an application.
///
/// This should only ever be called as the very first part of `main`, and
/// nowhere else. If you try to call it elsewhere, you'll just get an error.
///
/// Everything is written to stderr, so stdout stays free for actual command
/// output. `verbose` lowers the default level to debug.
///
/// See the tracing docs for logging for more information:
/// <https://docs.rs/tracing/latest/tracing/#shorthand-macros>
///
/// # Panics
///
/// If you've requested `tokio-console`, and it can't spawn the server.
///
/// # Errors
///
/// - If logging has already been installed.
/// - If the log filter, or console address could not be parsed.
pub fn install_logging_handlers(use_json: bool, verbose: bool) -> Result<()> {
	{
		let mut locked_init = HAS_INITIALIZED_LOGGING
			.lock()
			.unwrap_or_else(PoisonError::into_inner);
		if *locked_init {
			return Err(miette!("Logging has already been initialized!"));
		}
		*locked_init = true;
	}
	let explicit_level = env_var("SERGW_LOGGING").ok();
	let console_address = env_var("SERGW_TOKIO_CONSOLE_ADDR").ok();

	let filter_layer = EnvFilter::try_from_default_env().or_else(|_| {
		EnvFilter::try_new(explicit_level.unwrap_or_else(|| {
			default_filter(verbose, console_address.is_some()).to_owned()
		}))
		.into_diagnostic()
	})?;

	let console_layer = if let Some(addr) = console_address.as_ref() {
		let console_uri = addr
			.parse::<SocketAddr>()
			.into_diagnostic()
			.wrap_err("Failed to parse `SERGW_TOKIO_CONSOLE_ADDR` as an address to listen on!")?;
		Some(
			console_subscriber::ConsoleLayer::builder()
				.enable_self_trace(true)
				.server_addr(console_uri)
				.spawn(),
		)
	} else {
		None
	};

	subscriber_registry()
		.with(filter_layer)
		.with(output_layer(use_json))
		.with(ErrorLayer::default())
		.with(console_layer)
		.init();

	debug!(
		console_enabled = console_address.is_some(),
		json = use_json,
		verbose,
		"tokio-console-status"
	);
	Ok(())
}

/// The layer that actually writes events out, to stderr.
fn output_layer<S>(use_json: bool) -> Box<dyn Layer<S> + Send + Sync + 'static>
where
	S: Subscriber + for<'span> LookupSpan<'span>,
{
	if use_json {
		tracing_fmt_layer()
			.with_writer(stderr)
			.with_target(true)
			.json()
			.boxed()
	} else {
		tracing_fmt_layer()
			.with_writer(stderr)
			.with_target(true)
			.with_ansi(will_ansi())
			.boxed()
	}
}

//! A container for all the types of errors generated crate-wide.
//!
//! The top level error type is: [`GatewayError`], which wraps all the other
//! types of errors. You can find more specific error types documented on each
//! specific item.
//!
//! Only failures that stop a gateway from ever running are surfaced here. A
//! serial device going away, a client hanging up, or a queue overflowing are
//! all recovered from where they happen, and only ever show up in logs.

use miette::Diagnostic;
use thiserror::Error;
use tokio::{io::Error as IoError, task::JoinError};

/// The 'top-level' error type for this entire crate, all error types
/// wrap underneath this.
#[derive(Error, Diagnostic, Debug)]
pub enum GatewayError {
	/// We spawned a background task, and for whatever reason we could not
	/// wait for it to finish.
	///
	/// For the potential reasons for this, take a peek at [`tokio`]'s
	/// documentation. Which is our asynchronous runtime.
	#[error("We could not await an asynchronous task we spawned: {0:?}")]
	#[diagnostic(code(serial_gateway::join_failure))]
	JoinFailure(#[from] JoinError),
	/// See [`NetworkError`] for details.
	#[error(transparent)]
	#[diagnostic(transparent)]
	NetworkError(#[from] NetworkError),
	/// See [`SerialError`] for details.
	#[error(transparent)]
	#[diagnostic(transparent)]
	SerialError(#[from] SerialError),
}

/// Trying to interact with the network has resulted in an error.
#[derive(Error, Diagnostic, Debug)]
pub enum NetworkError {
	/// We failed to bind to a local address to listen for TCP clients.
	///
	/// This can happen for numerous reason, such as:
	///
	/// - The program does not have permission to listen on this specific port.
	/// - The address is already being used by another process.
	/// - The address could not be resolved at all.
	#[error("Failed to bind to `{address}` to listen for TCP clients: {source}")]
	#[diagnostic(
		code(serial_gateway::net::bind_address_error),
		help("Check that nothing else is listening on this address, or pick another with `--host`.")
	)]
	BindAddressError {
		address: String,
		#[source]
		source: IoError,
	},
	/// Accepting a new client failed in a way we don't expect to recover
	/// from by simply trying again.
	#[error("The TCP listener failed to accept new clients: {0}")]
	#[diagnostic(code(serial_gateway::net::accept_failure))]
	AcceptFailure(#[source] IoError),
}

/// Trying to interact with serial devices has resulted in an error.
#[derive(Error, Diagnostic, Debug)]
pub enum SerialError {
	/// The OS would not tell us which serial devices exist.
	#[error("Failed to enumerate the serial ports on this machine: {0}")]
	#[diagnostic(
		code(serial_gateway::serial::enumeration_failure),
		help("Please report this issue for extra debugging support.")
	)]
	EnumerationFailure(#[source] IoError),
}

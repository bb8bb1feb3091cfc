//! Every exit code `sergw` can exit with.
//!
//! A shutdown caused by a signal (ctrl-c, or `SIGTERM`) is a normal shutdown,
//! and exits with `0`.

/// The gateway, or some other unrecoverable startup step failed. This
/// includes not being able to bind the TCP address.
pub const GATEWAY_FAILURE: i32 = 1;
/// We could not get a list of serial ports from the OS.
pub const PORTS_FAILED_ENUMERATION: i32 = 1;
/// We could not setup logging, so we can't tell you anything else.
pub const LOGGING_HANDLER_INSTALL_FAILURE: i32 = 1;

/// The arguments passed on the command line could not be parsed.
pub const ARGUMENT_PARSING_FAILURE: i32 = 2;
/// No subcommand was given at all.
pub const NO_ARGUMENT_SPECIFIED_FAILURE: i32 = 2;
/// `listen` was called without a serial device to listen on.
pub const NO_SERIAL_PORT_SPECIFIED: i32 = 2;

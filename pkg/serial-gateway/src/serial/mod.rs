//! Everything to do with the serial side of the gateway.
//!
//! The gateway itself never talks to an OS serial API directly. It goes
//! through two small traits:
//!
//! - [`DeviceOpener`], which knows how to open a device for a
//!   [`LinkConfiguration`].
//! - [`SerialDevice`], a single open handle to that device.
//!
//! [`SystemSerialOpener`] is the implementation backed by real hardware. The
//! [`SerialLinkManager`] owns the lifecycle on top of these: reopening the
//! device whenever it goes away, and buffering writes while it's gone.

mod backoff;
mod manager;
mod system;

pub use backoff::*;
pub use manager::*;
pub use system::*;

use crate::{config::LinkConfiguration, errors::SerialError};
use std::io::{ErrorKind as IoErrorKind, Result as IoResult};

/// One open handle to a serial device.
///
/// Reads should never block for longer than the configured read timeout. The
/// different ways a read can come back mean different things:
///
/// - `Ok(0)`: nothing was available this time, try again.
/// - `Err` of kind [`IoErrorKind::TimedOut`] or [`IoErrorKind::WouldBlock`]:
///   also nothing available, this is what lets the reader check for
///   cancellation.
/// - `Err` of kind [`IoErrorKind::UnexpectedEof`]: the device hung up.
/// - Any other `Err`: the device has failed, and needs to be reopened.
pub trait SerialDevice: Send + 'static {
	/// Read whatever bytes are available into `buff`.
	///
	/// ## Errors
	///
	/// See the trait level documentation for what each error means.
	fn read(&mut self, buff: &mut [u8]) -> IoResult<usize>;

	/// Write the entirety of `buff` to the device.
	///
	/// A failed call may still have put part of `buff` on the wire. The
	/// gateway resends the whole chunk on the next session, so the far end can
	/// see those leading bytes twice.
	///
	/// ## Errors
	///
	/// If the device could not accept all of the bytes.
	fn write_all(&mut self, buff: &[u8]) -> IoResult<()>;

	/// Get a second handle to the same device, so one task can read while
	/// another writes.
	///
	/// ## Errors
	///
	/// If the OS will not duplicate the handle.
	fn try_clone(&self) -> IoResult<Box<dyn SerialDevice>>;
}

/// Something that can open serial devices.
pub trait DeviceOpener: Send + Sync + 'static {
	/// Open, and configure the device described by `config`.
	///
	/// This may block, it's always called from a blocking thread.
	///
	/// ## Errors
	///
	/// If the device doesn't exist, is busy, or can't be configured.
	fn open(&self, config: &LinkConfiguration) -> IoResult<Box<dyn SerialDevice>>;
}

/// Get a list of the serial devices that exist on this machine.
///
/// ## Errors
///
/// If your platform is unsupported, or an OS error occurs.
pub fn available_ports() -> Result<Vec<String>, SerialError> {
	serialport::available_ports()
		.map(|ports| ports.into_iter().map(|port| port.port_name).collect())
		.map_err(|cause| SerialError::EnumerationFailure(cause.into()))
}

/// If a read failed only because there was nothing to read yet.
#[must_use]
pub fn is_timeout(kind: IoErrorKind) -> bool {
	matches!(
		kind,
		IoErrorKind::TimedOut | IoErrorKind::WouldBlock | IoErrorKind::Interrupted
	)
}

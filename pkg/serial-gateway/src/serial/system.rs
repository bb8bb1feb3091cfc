//! Serial devices backed by real hardware through [`serialport`].

use crate::{
	config::LinkConfiguration,
	serial::{DeviceOpener, SerialDevice},
};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{Error as IoError, ErrorKind as IoErrorKind, Read, Result as IoResult, Write};

/// Opens the real serial device at [`LinkConfiguration::device_path`].
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemSerialOpener;

impl DeviceOpener for SystemSerialOpener {
	fn open(&self, config: &LinkConfiguration) -> IoResult<Box<dyn SerialDevice>> {
		let port = serialport::new(config.device_path.as_str(), config.baud_rate)
			.data_bits(DataBits::Eight)
			.parity(Parity::None)
			.stop_bits(StopBits::One)
			.flow_control(FlowControl::None)
			.timeout(config.read_timeout)
			.open()?;

		Ok(Box::new(SystemSerialDevice { port }))
	}
}

/// An open handle to a serial device on this machine.
pub struct SystemSerialDevice {
	port: Box<dyn SerialPort>,
}

impl SerialDevice for SystemSerialDevice {
	fn read(&mut self, buff: &mut [u8]) -> IoResult<usize> {
		match self.port.read(buff) {
			// `serialport` reports an empty port as a timeout, so a zero byte read
			// with room to spare means the other side hung up.
			Ok(0) if !buff.is_empty() => Err(IoError::new(
				IoErrorKind::UnexpectedEof,
				"serial device hung up",
			)),
			other => other,
		}
	}

	fn write_all(&mut self, buff: &[u8]) -> IoResult<()> {
		self.port.write_all(buff)?;
		self.port.flush()
	}

	fn try_clone(&self) -> IoResult<Box<dyn SerialDevice>> {
		Ok(Box::new(Self {
			port: self.port.try_clone()?,
		}))
	}
}

#[cfg(test)]
mod unit_tests {
	use super::*;

	#[test]
	pub fn opening_a_missing_device_fails() {
		let config = LinkConfiguration::new("/dev/this-serial-device-does-not-exist", 57_600);
		assert!(
			SystemSerialOpener.open(&config).is_err(),
			"Somehow opened a serial device that doesn't exist?",
		);
	}
}

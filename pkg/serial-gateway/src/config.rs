//! Configuration for a single serial link, along with the fixed sizes the
//! rest of the gateway uses for its queues and buffers.

use std::time::Duration;

/// The baud rate used when none is specified.
pub const DEFAULT_BAUD_RATE: u32 = 57_600;
/// The TCP address a gateway listens on when none is specified.
pub const DEFAULT_TCP_HOST: &str = "127.0.0.1:5656";
/// How long a single read from the serial device may block.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(2);
/// The first delay after a failed attempt to open the serial device.
pub const DEFAULT_RECONNECT_BASE: Duration = Duration::from_millis(200);
/// The ceiling for the delay between attempts to open the serial device.
pub const DEFAULT_RECONNECT_MAX: Duration = Duration::from_secs(2);
/// The delay used for every failed open after the first one, when using
/// [`BackoffPolicy::Flat`].
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);
/// How many bytes we'll hold onto for the serial device while it's unplugged.
pub const DEFAULT_WRITE_BUFFER_LIMIT: usize = 256 * 1024;

/// How many chunks TCP clients can have in flight towards the serial
/// device before they have to wait.
pub const SERIAL_INBOUND_CAPACITY: usize = 1024;
/// How many chunks a single TCP client can fall behind before broadcasts
/// start getting dropped for it.
pub const CLIENT_OUTBOUND_CAPACITY: usize = 256;
/// The size of the scratch buffer used for every read (serial, and TCP).
pub const READ_CHUNK_SIZE: usize = 4096;

/// How the delay between attempts to open the serial device grows.
#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq)]
pub enum BackoffPolicy {
	/// Wait [`LinkConfiguration::reconnect_base`] after the first failure, and
	/// [`LinkConfiguration::retry_interval`] after every failure after that.
	///
	/// This is the cadence deployed gateways have always used, so it stays the
	/// default.
	#[default]
	Flat,
	/// Start at [`LinkConfiguration::reconnect_base`] and double on every
	/// failure, never going past [`LinkConfiguration::reconnect_max`].
	Exponential,
}

/// Everything needed to open, and keep open one serial device.
///
/// This is treated as immutable once it has been handed to a
/// [`crate::serial::SerialLinkManager`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkConfiguration {
	/// The path to the serial device (e.g. `/dev/ttyUSB0`), or the name of a
	/// COM device on windows (e.g. `COM3`).
	pub device_path: String,
	/// The line speed, the line is always configured as 8N1 without flow
	/// control.
	pub baud_rate: u32,
	/// The upper bound on how long a single read may block.
	///
	/// This is also how often the read loop notices it has been cancelled.
	pub read_timeout: Duration,
	/// The first delay after a failed attempt to open the device.
	pub reconnect_base: Duration,
	/// The ceiling for [`BackoffPolicy::Exponential`].
	pub reconnect_max: Duration,
	/// The delay for all but the first failure when using
	/// [`BackoffPolicy::Flat`].
	pub retry_interval: Duration,
	/// See [`BackoffPolicy`].
	pub backoff_policy: BackoffPolicy,
	/// The maximum amount of bytes waiting to be written to the device.
	pub write_buffer_limit: usize,
	/// Log every chunk moving through the gateway.
	pub verbose: bool,
}

impl LinkConfiguration {
	/// Create a configuration for a device, using the default for everything
	/// but the path, and baud rate.
	#[must_use]
	pub fn new(device_path: impl Into<String>, baud_rate: u32) -> Self {
		Self {
			device_path: device_path.into(),
			baud_rate,
			read_timeout: DEFAULT_READ_TIMEOUT,
			reconnect_base: DEFAULT_RECONNECT_BASE,
			reconnect_max: DEFAULT_RECONNECT_MAX,
			retry_interval: DEFAULT_RETRY_INTERVAL,
			backoff_policy: BackoffPolicy::default(),
			write_buffer_limit: DEFAULT_WRITE_BUFFER_LIMIT,
			verbose: false,
		}
	}

	/// Set [`Self::verbose`].
	#[must_use]
	pub fn with_verbose(mut self, verbose: bool) -> Self {
		self.verbose = verbose;
		self
	}

	/// Replace any unusable values with sane ones.
	///
	/// Zero durations, and a zero byte buffer would make the gateway spin, or
	/// throw away everything, so they get replaced with defaults.
	#[must_use]
	pub fn normalized(mut self) -> Self {
		if self.read_timeout.is_zero() {
			self.read_timeout = DEFAULT_READ_TIMEOUT;
		}
		if self.reconnect_base.is_zero() {
			self.reconnect_base = Duration::from_secs(1);
		}
		if self.reconnect_max < self.reconnect_base {
			self.reconnect_max = DEFAULT_RECONNECT_MAX.max(self.reconnect_base);
		}
		if self.retry_interval.is_zero() {
			self.retry_interval = DEFAULT_RETRY_INTERVAL;
		}
		if self.write_buffer_limit == 0 {
			self.write_buffer_limit = DEFAULT_WRITE_BUFFER_LIMIT;
		}
		self
	}
}

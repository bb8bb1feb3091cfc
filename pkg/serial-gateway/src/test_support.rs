//! In-memory serial devices for exercising the gateway without hardware.

use crate::{
	config::LinkConfiguration,
	serial::{DeviceOpener, SerialDevice},
};
use bytes::Bytes;
use std::{
	io::{Error as IoError, ErrorKind as IoErrorKind, Result as IoResult},
	sync::{
		atomic::{AtomicBool, AtomicUsize, Ordering},
		mpsc::{channel, Receiver, RecvTimeoutError, Sender},
		Arc, Mutex, MutexGuard, PoisonError,
	},
	time::Duration,
};
use tokio::time::{sleep, timeout};

const POLL: Duration = Duration::from_millis(5);

/// The 'other end' of a fake serial cable.
///
/// Every device opened through a [`FakeOpener`] shares the same line, so the
/// line outlives reconnects the way a real cable would.
#[derive(Debug)]
pub struct FakeLine {
	written: Mutex<Vec<Bytes>>,
	write_attempts: AtomicUsize,
	failing_writes: Mutex<Vec<usize>>,
	open_attempts: AtomicUsize,
	open_failures: AtomicUsize,
	opens: AtomicUsize,
	hang_up: AtomicBool,
	empty_reads: AtomicUsize,
	exclusive: AtomicBool,
	live_handles: AtomicUsize,
	feed: Mutex<Sender<Vec<u8>>>,
	incoming: Mutex<Receiver<Vec<u8>>>,
}

impl FakeLine {
	pub fn new() -> Arc<Self> {
		let (feed, incoming) = channel();
		Arc::new(Self {
			written: Mutex::new(Vec::new()),
			write_attempts: AtomicUsize::new(0),
			failing_writes: Mutex::new(Vec::new()),
			open_attempts: AtomicUsize::new(0),
			open_failures: AtomicUsize::new(0),
			opens: AtomicUsize::new(0),
			hang_up: AtomicBool::new(false),
			empty_reads: AtomicUsize::new(0),
			exclusive: AtomicBool::new(false),
			live_handles: AtomicUsize::new(0),
			feed: Mutex::new(feed),
			incoming: Mutex::new(incoming),
		})
	}

	/// Fail the next `count` attempts to open a device on this line.
	pub fn fail_next_opens(&self, count: usize) {
		self.open_failures.store(count, Ordering::SeqCst);
	}

	/// Fail the writes with these (zero based) attempt numbers.
	pub fn fail_write_attempts(&self, attempts: &[usize]) {
		lock(&self.failing_writes).extend_from_slice(attempts);
	}

	/// Have the device report it hung up on its next read.
	pub fn hang_up(&self) {
		self.hang_up.store(true, Ordering::SeqCst);
	}

	/// Have the next `count` reads come back with zero bytes.
	pub fn return_empty_reads(&self, count: usize) {
		self.empty_reads.store(count, Ordering::SeqCst);
	}

	pub fn empty_reads_left(&self) -> usize {
		self.empty_reads.load(Ordering::SeqCst)
	}

	/// Refuse to open the device while any handle from a previous open is
	/// still alive, like a unix port opened with `TIOCEXCL`.
	pub fn make_exclusive(&self) {
		self.exclusive.store(true, Ordering::SeqCst);
	}

	/// How many device handles (including clones) have not been dropped yet.
	pub fn live_handles(&self) -> usize {
		self.live_handles.load(Ordering::SeqCst)
	}

	/// Make bytes available for the device to read.
	pub fn feed(&self, data: &[u8]) {
		_ = lock(&self.feed).send(data.to_vec());
	}

	pub fn opens(&self) -> usize {
		self.opens.load(Ordering::SeqCst)
	}

	pub fn open_attempts(&self) -> usize {
		self.open_attempts.load(Ordering::SeqCst)
	}

	pub fn write_attempts(&self) -> usize {
		self.write_attempts.load(Ordering::SeqCst)
	}

	/// Every chunk that was successfully written, in order.
	pub fn written_chunks(&self) -> Vec<Bytes> {
		lock(&self.written).clone()
	}

	/// Every byte that was successfully written, in order.
	pub fn written_bytes(&self) -> Vec<u8> {
		lock(&self.written)
			.iter()
			.flat_map(|chunk| chunk.iter().copied())
			.collect()
	}

	/// Wait until at least `expected.len()` bytes have been written, and
	/// check they're exactly `expected`.
	///
	/// ## Panics
	///
	/// If the bytes don't show up in time, or are not what was expected.
	pub async fn wait_for_written(&self, expected: &[u8], within: Duration) {
		self.wait_until(within, "bytes to be written", || {
			self.written_bytes().len() >= expected.len()
		})
		.await;
		assert_eq!(
			self.written_bytes(),
			expected,
			"Serial device received unexpected bytes!",
		);
	}

	/// ## Panics
	///
	/// If there are not `count` successful opens in time.
	pub async fn wait_for_opens(&self, count: usize, within: Duration) {
		self.wait_until(within, "device to be opened", || self.opens() >= count)
			.await;
	}

	/// ## Panics
	///
	/// If there are not `count` open attempts in time.
	pub async fn wait_for_open_attempts(&self, count: usize, within: Duration) {
		self.wait_until(within, "device open attempts", || {
			self.open_attempts() >= count
		})
		.await;
	}

	async fn wait_until(&self, within: Duration, what: &str, done: impl Fn() -> bool) {
		let waited = timeout(within, async {
			while !done() {
				sleep(POLL).await;
			}
		})
		.await;
		assert!(waited.is_ok(), "Timed out waiting for {what}!");
	}
}

/// Opens [`FakeDevice`]s on one [`FakeLine`].
#[derive(Clone, Debug)]
pub struct FakeOpener {
	line: Arc<FakeLine>,
}

impl FakeOpener {
	pub fn new(line: &Arc<FakeLine>) -> Self {
		Self {
			line: Arc::clone(line),
		}
	}
}

impl DeviceOpener for FakeOpener {
	fn open(&self, config: &LinkConfiguration) -> IoResult<Box<dyn SerialDevice>> {
		self.line.open_attempts.fetch_add(1, Ordering::SeqCst);
		let should_fail = self
			.line
			.open_failures
			.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
			.is_ok();
		if should_fail {
			return Err(IoError::new(
				IoErrorKind::NotFound,
				format!("{} is unplugged", config.device_path),
			));
		}

		if self.line.exclusive.load(Ordering::SeqCst) && self.line.live_handles() > 0 {
			return Err(IoError::new(
				IoErrorKind::Other,
				format!("{} is busy", config.device_path),
			));
		}

		self.line.opens.fetch_add(1, Ordering::SeqCst);
		Ok(Box::new(FakeDevice::new(&self.line, config.read_timeout)))
	}
}

/// One handle onto a [`FakeLine`].
#[derive(Debug)]
pub struct FakeDevice {
	line: Arc<FakeLine>,
	read_timeout: Duration,
}

impl FakeDevice {
	fn new(line: &Arc<FakeLine>, read_timeout: Duration) -> Self {
		line.live_handles.fetch_add(1, Ordering::SeqCst);
		Self {
			line: Arc::clone(line),
			read_timeout,
		}
	}
}

impl Drop for FakeDevice {
	fn drop(&mut self) {
		self.line.live_handles.fetch_sub(1, Ordering::SeqCst);
	}
}

impl SerialDevice for FakeDevice {
	fn read(&mut self, buff: &mut [u8]) -> IoResult<usize> {
		if self.line.hang_up.swap(false, Ordering::SeqCst) {
			return Err(IoError::from(IoErrorKind::UnexpectedEof));
		}
		let empty = self
			.line
			.empty_reads
			.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
			.is_ok();
		if empty {
			return Ok(0);
		}

		match lock(&self.line.incoming).recv_timeout(self.read_timeout) {
			Ok(data) => {
				let amount = data.len().min(buff.len());
				buff[..amount].copy_from_slice(&data[..amount]);
				Ok(amount)
			}
			Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => {
				Err(IoError::from(IoErrorKind::TimedOut))
			}
		}
	}

	fn write_all(&mut self, buff: &[u8]) -> IoResult<()> {
		let attempt = self.line.write_attempts.fetch_add(1, Ordering::SeqCst);
		if lock(&self.line.failing_writes).contains(&attempt) {
			return Err(IoError::from(IoErrorKind::BrokenPipe));
		}
		lock(&self.line.written).push(Bytes::copy_from_slice(buff));
		Ok(())
	}

	fn try_clone(&self) -> IoResult<Box<dyn SerialDevice>> {
		Ok(Box::new(Self::new(&self.line, self.read_timeout)))
	}
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
	mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

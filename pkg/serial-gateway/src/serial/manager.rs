//! Keep a serial device open for as long as the gateway runs.
//!
//! The manager is made up of two loops that run side by side:
//!
//! 1. The reconnect loop. It opens the device (retrying forever with a
//!    backoff), hands a writer handle to the transmit loop, and then pumps
//!    reads into the broadcast callback until the session fails. Then it does
//!    it all again.
//! 2. The transmit loop. It is the only owner of the pending write queue, and
//!    of the current session's writer. Everything TCP clients send lands in
//!    the queue, and is written out whenever a session is live.
//!
//! A session ends when either side of it fails, at which point its token is
//! cancelled so the other side notices too. The device is only reopened once
//! the transmit loop has dropped its writer, ports opened exclusively stay
//! locked until every handle is closed.

use crate::{
	config::{LinkConfiguration, READ_CHUNK_SIZE, SERIAL_INBOUND_CAPACITY},
	queue::BoundedByteQueue,
	serial::{is_timeout, DeviceOpener, ReconnectBackoff, SerialDevice},
};
use bytes::Bytes;
use std::{
	fmt::{Debug, Formatter, Result as FmtResult},
	io::{Error as IoError, Result as IoResult},
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc, Mutex, MutexGuard, PoisonError,
	},
};
use tokio::{
	sync::{
		mpsc::{channel, Receiver, Sender},
		oneshot::{channel as oneshot_channel, Sender as OneshotSender},
		watch::{channel as watch_channel, Receiver as WatchReceiver, Sender as WatchSender},
	},
	task::spawn_blocking,
	time::sleep,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// The callback every chunk read from the serial device is handed to.
pub type BroadcastFn = Arc<dyn Fn(Bytes) + Send + Sync>;

/// Where the serial link currently is in its lifecycle.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum LinkState {
	/// The device is not open, we're either about to open it or waiting to
	/// try again.
	Disconnected,
	/// A session is live, reads and writes are flowing.
	Connected,
	/// The manager has been cancelled, and stopped.
	Shutdown,
}

/// One open period of the serial device, as seen by the transmit loop.
///
/// Fields drop in order, so `released` only fires after `writer` is closed.
struct Session {
	writer: Box<dyn SerialDevice>,
	token: CancellationToken,
	released: OneshotSender<()>,
}

/// Owns the lifecycle of one serial device.
pub struct SerialLinkManager {
	config: LinkConfiguration,
	opener: Arc<dyn DeviceOpener>,
	broadcast: BroadcastFn,
	inbound_sender: Sender<Bytes>,
	/// Taken by [`Self::run`] for as long as it runs, and put back after.
	inbound_receiver: Mutex<Option<Receiver<Bytes>>>,
	running: AtomicBool,
	state: WatchSender<LinkState>,
}

impl SerialLinkManager {
	/// Create a new manager, nothing is opened until [`Self::run`] is called.
	///
	/// `broadcast` is called from a blocking thread for every chunk read from
	/// the device, so it must never block itself.
	#[must_use]
	pub fn new(
		config: LinkConfiguration,
		opener: impl DeviceOpener,
		broadcast: impl Fn(Bytes) + Send + Sync + 'static,
	) -> Self {
		let (inbound_sender, inbound_receiver) = channel(SERIAL_INBOUND_CAPACITY);
		let (state, _) = watch_channel(LinkState::Disconnected);

		Self {
			config: config.normalized(),
			opener: Arc::new(opener),
			broadcast: Arc::new(broadcast),
			inbound_sender,
			inbound_receiver: Mutex::new(Some(inbound_receiver)),
			running: AtomicBool::new(false),
			state,
		}
	}

	/// Get a producer for data that should be written to the serial device.
	///
	/// Sending waits when the transmit loop has fallen
	/// [`SERIAL_INBOUND_CAPACITY`] chunks behind.
	#[must_use]
	pub fn inbound(&self) -> Sender<Bytes> {
		self.inbound_sender.clone()
	}

	/// Watch the link move between states.
	#[must_use]
	pub fn subscribe_state(&self) -> WatchReceiver<LinkState> {
		self.state.subscribe()
	}

	/// The state the link is in right now.
	#[must_use]
	pub fn state(&self) -> LinkState {
		*self.state.borrow()
	}

	#[must_use]
	pub const fn config(&self) -> &LinkConfiguration {
		&self.config
	}

	/// Keep the serial device open, and moving data until `cancel` is
	/// cancelled.
	///
	/// Failing to open, read, or write the device is never fatal, those are
	/// all logged, and retried. Only one call may run at a time, any other
	/// call while one is running returns immediately.
	pub async fn run(&self, cancel: CancellationToken) {
		if self.running.swap(true, Ordering::AcqRel) {
			debug!(
				device = %self.config.device_path,
				"serial link manager is already running, ignoring second run",
			);
			return;
		}
		let Some(inbound) = self.lock_inbound().take() else {
			error!(
				device = %self.config.device_path,
				"serial inbound queue was lost by a previous run, cannot run again",
			);
			self.running.store(false, Ordering::Release);
			return;
		};

		let (session_sender, session_receiver) = channel(1);
		let transmit = tokio::spawn(
			Transmitter {
				pending: BoundedByteQueue::new(self.config.write_buffer_limit),
				session: None,
				device: self.config.device_path.clone(),
				verbose: self.config.verbose,
			}
			.run(inbound, session_receiver, cancel.clone()),
		);

		self.reconnect_loop(&cancel, &session_sender).await;
		drop(session_sender);

		match transmit.await {
			Ok(inbound) => *self.lock_inbound() = Some(inbound),
			Err(cause) => error!(?cause, "serial transmit task failed"),
		}
		self.state.send_replace(LinkState::Shutdown);
		self.running.store(false, Ordering::Release);
		info!(device = %self.config.device_path, "Serial link stopped");
	}

	async fn reconnect_loop(&self, cancel: &CancellationToken, sessions: &Sender<Session>) {
		let mut backoff = ReconnectBackoff::new(&self.config);

		while !cancel.is_cancelled() {
			self.state.send_replace(LinkState::Disconnected);

			let (reader, writer) = match self.open_device().await {
				Ok(handles) => handles,
				Err(cause) => {
					let delay = backoff.next_delay();
					warn!(
						device = %self.config.device_path,
						%cause,
						?delay,
						"Open serial failed; will retry",
					);
					tokio::select! {
						() = cancel.cancelled() => break,
						() = sleep(delay) => continue,
					}
				}
			};
			backoff.reset();
			info!(
				device = %self.config.device_path,
				baud = self.config.baud_rate,
				"Serial port opened",
			);

			let token = cancel.child_token();
			let (released, writer_closed) = oneshot_channel();
			let session = Session {
				writer,
				token: token.clone(),
				released,
			};
			tokio::select! {
				() = cancel.cancelled() => break,
				sent = sessions.send(session) => {
					if sent.is_err() {
						error!("serial transmit loop went away, stopping reconnects");
						break;
					}
				}
			}
			self.state.send_replace(LinkState::Connected);

			let reason = self.pump_reads(reader, token.clone()).await;
			token.cancel();
			// Either the transmit loop let go of the writer, or it's gone
			// entirely. Both close the handle.
			tokio::select! {
				biased;

				() = cancel.cancelled() => break,
				_ = writer_closed => {}
			}
			match reason {
				Some(cause) => warn!(
					device = %self.config.device_path,
					%cause,
					"Serial session ended; will reconnect",
				),
				None => warn!(
					device = %self.config.device_path,
					"Serial session ended by a failed write; will reconnect",
				),
			}
		}
	}

	/// Open the device, along with a second handle for writing.
	async fn open_device(&self) -> IoResult<(Box<dyn SerialDevice>, Box<dyn SerialDevice>)> {
		let opener = Arc::clone(&self.opener);
		let config = self.config.clone();

		spawn_blocking(move || {
			let reader = opener.open(&config)?;
			let writer = reader.try_clone()?;
			Ok((reader, writer))
		})
		.await?
	}

	/// Read from the device until the session is cancelled, or the device
	/// fails.
	///
	/// Returns the error that ended the session, or `None` if it was
	/// cancelled.
	async fn pump_reads(
		&self,
		mut reader: Box<dyn SerialDevice>,
		token: CancellationToken,
	) -> Option<IoError> {
		let broadcast = Arc::clone(&self.broadcast);
		let device = self.config.device_path.clone();
		let verbose = self.config.verbose;

		let outcome = spawn_blocking(move || {
			let mut scratch = vec![0_u8; READ_CHUNK_SIZE];
			while !token.is_cancelled() {
				match reader.read(&mut scratch) {
					Ok(0) => {}
					Ok(read) => {
						if verbose {
							info!(%device, bytes = read, "Serial→TCP");
						}
						broadcast(Bytes::copy_from_slice(&scratch[..read]));
					}
					Err(cause) if is_timeout(cause.kind()) => {}
					Err(cause) => return Some(cause),
				}
			}
			None
		})
		.await;

		match outcome {
			Ok(reason) => reason,
			Err(cause) => Some(cause.into()),
		}
	}

	fn lock_inbound(&self) -> MutexGuard<'_, Option<Receiver<Bytes>>> {
		self.inbound_receiver
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
	}
}

impl Debug for SerialLinkManager {
	fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
		fmt.debug_struct("SerialLinkManager")
			.field("config", &self.config)
			.field("running", &self.running.load(Ordering::Relaxed))
			.field("state", &self.state())
			.finish_non_exhaustive()
	}
}

/// The transmit loop's state, only ever touched by its own task.
struct Transmitter {
	pending: BoundedByteQueue,
	session: Option<Session>,
	device: String,
	verbose: bool,
}

impl Transmitter {
	/// Returns the inbound receiver once cancelled, so the manager can run
	/// again later.
	async fn run(
		mut self,
		mut inbound: Receiver<Bytes>,
		mut sessions: Receiver<Session>,
		cancel: CancellationToken,
	) -> Receiver<Bytes> {
		loop {
			self.flush().await;

			tokio::select! {
				biased;

				() = cancel.cancelled() => break,
				next = sessions.recv() => match next {
					Some(session) => self.session = Some(session),
					None => break,
				},
				chunk = inbound.recv() => match chunk {
					Some(chunk) => self.enqueue(chunk),
					None => break,
				},
				() = session_ended(self.session.as_ref().map(|session| &session.token)) => {
					// Drops our writer handle so the device can be reopened.
					self.session = None;
				}
			}
		}

		inbound
	}

	fn enqueue(&mut self, chunk: Bytes) {
		let dropped = self.pending.push(chunk);
		if dropped > 0 {
			if self.verbose {
				warn!(
					device = %self.device,
					dropped,
					limit = self.pending.limit(),
					"Pending serial writes over limit; dropped oldest bytes",
				);
			} else {
				debug!(
					device = %self.device,
					dropped,
					limit = self.pending.limit(),
					"Pending serial writes over limit; dropped oldest bytes",
				);
			}
		}
		if self.verbose && self.session.is_none() {
			info!(
				queued_bytes = self.pending.size(),
				limit = self.pending.limit(),
				"Buffered outbound while serial unavailable",
			);
		}
	}

	/// Write out as much of the pending queue as the current session allows.
	///
	/// A chunk is only popped once it has been written in full, so a failed
	/// write leaves it at the front for the next session.
	async fn flush(&mut self) {
		while let Some(chunk) = self.pending.front().cloned() {
			let Some(mut session) = self.session.take() else {
				return;
			};
			if session.token.is_cancelled() {
				return;
			}
			let token = session.token.clone();

			let outcome = spawn_blocking(move || {
				let result = session.writer.write_all(&chunk);
				(session, chunk.len(), result)
			})
			.await;

			match outcome {
				Ok((session, written, Ok(()))) => {
					self.pending.pop();
					self.session = Some(session);
					if self.verbose {
						info!(device = %self.device, bytes = written, "TCP→Serial");
					}
				}
				Ok((session, _, Err(cause))) => {
					warn!(
						device = %self.device,
						%cause,
						"Serial write failed; cancelling session for reconnect",
					);
					drop(session);
					token.cancel();
					return;
				}
				Err(cause) => {
					error!(?cause, "serial write task failed; cancelling session");
					token.cancel();
					return;
				}
			}
		}
	}
}

/// Resolve once the session (if there is one) has ended.
async fn session_ended(token: Option<&CancellationToken>) {
	match token {
		Some(token) => token.cancelled().await,
		None => std::future::pending().await,
	}
}

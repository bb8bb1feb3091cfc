//! The TCP side of the gateway.
//!
//! Every accepted connection gets a reader, and a writer pump. The reader
//! forwards whatever the client sends into the serial manager's inbound
//! queue, and the writer drains the client's outbound channel (fed by
//! [`ClientRegistry::broadcast`]) back onto the socket.

use crate::{
	clients::ClientRegistry,
	config::{CLIENT_OUTBOUND_CAPACITY, READ_CHUNK_SIZE},
	errors::NetworkError,
};
use bytes::{Bytes, BytesMut};
use std::{
	io::Error as IoError,
	net::SocketAddr,
	sync::Arc,
	time::Duration,
};
use tokio::{
	io::{AsyncReadExt, AsyncWriteExt},
	net::{
		tcp::{OwnedReadHalf, OwnedWriteHalf},
		TcpListener, TcpStream,
	},
	sync::mpsc::{channel, Receiver, Sender},
	task::JoinSet,
	time::sleep,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How long to back off after an accept error we expect to go away.
pub const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Accepts TCP clients, and pumps bytes between them and the serial link.
#[derive(Debug)]
pub struct TcpGatewayServer {
	listener: TcpListener,
	local_address: SocketAddr,
	clients: Arc<ClientRegistry>,
	serial_inbound: Sender<Bytes>,
	verbose: bool,
}

impl TcpGatewayServer {
	/// Start listening on `address`.
	///
	/// This is the one point where a gateway can fail to start, nothing after
	/// this is fatal.
	///
	/// ## Errors
	///
	/// If we cannot bind to `address`.
	pub async fn bind(
		address: &str,
		clients: Arc<ClientRegistry>,
		serial_inbound: Sender<Bytes>,
		verbose: bool,
	) -> Result<Self, NetworkError> {
		let into_bind_error = |source: IoError| NetworkError::BindAddressError {
			address: address.to_owned(),
			source,
		};
		let listener = TcpListener::bind(address).await.map_err(into_bind_error)?;
		let local_address = listener.local_addr().map_err(into_bind_error)?;
		info!(address = %local_address, "TCP server listening");

		Ok(Self {
			listener,
			local_address,
			clients,
			serial_inbound,
			verbose,
		})
	}

	/// The address we actually ended up listening on.
	#[must_use]
	pub const fn local_addr(&self) -> SocketAddr {
		self.local_address
	}

	/// Accept clients until `cancel` is cancelled.
	///
	/// Every connection is torn down, and its socket closed before this
	/// returns.
	///
	/// ## Errors
	///
	/// If accepting clients fails in a way that retrying won't fix.
	pub async fn run(self, cancel: CancellationToken) -> Result<(), NetworkError> {
		let Self {
			listener,
			clients,
			serial_inbound,
			verbose,
			..
		} = self;
		let connections_token = cancel.child_token();
		let mut connections = JoinSet::new();

		let result = loop {
			tokio::select! {
				biased;

				() = cancel.cancelled() => {
					info!("TCP listener shutting down");
					break Ok(());
				}
				Some(finished) = connections.join_next(), if !connections.is_empty() => {
					if let Err(cause) = finished {
						error!(?cause, "TCP connection task failed");
					}
				}
				accepted = listener.accept() => match accepted {
					Ok((stream, address)) => {
						connections.spawn(serve_connection(
							stream,
							address,
							Arc::clone(&clients),
							serial_inbound.clone(),
							connections_token.child_token(),
							verbose,
						));
					}
					Err(cause) if is_listener_dead(&cause) => {
						error!(%cause, "Accept error; TCP listener is unusable");
						break Err(NetworkError::AcceptFailure(cause));
					}
					Err(cause) => {
						warn!(%cause, "Accept error; retrying");
						tokio::select! {
							() = cancel.cancelled() => {}
							() = sleep(ACCEPT_RETRY_DELAY) => {}
						}
					}
				},
			}
		};

		drop(listener);
		connections_token.cancel();
		while let Some(finished) = connections.join_next().await {
			if let Err(cause) = finished {
				error!(?cause, "TCP connection task failed");
			}
		}

		result
	}
}

/// Pump bytes both ways for a single client, until either direction fails
/// or the server shuts down.
async fn serve_connection(
	stream: TcpStream,
	address: SocketAddr,
	clients: Arc<ClientRegistry>,
	serial_inbound: Sender<Bytes>,
	token: CancellationToken,
	verbose: bool,
) {
	info!(%address, "Accepted TCP connection");
	if let Err(cause) = stream.set_nodelay(true) {
		debug!(%address, %cause, "could not disable nagle on TCP connection");
	}

	let (outbound_sender, outbound) = channel(CLIENT_OUTBOUND_CAPACITY);
	clients.add(address, outbound_sender);

	let (reader, writer) = stream.into_split();
	let writer = tokio::spawn(write_pump(writer, outbound, address, token.clone()));
	read_pump(reader, address, &serial_inbound, &token, verbose).await;

	// The stop flag has to be set before the registry drops our channel.
	token.cancel();
	clients.remove(&address);
	if let Err(cause) = writer.await {
		error!(%address, ?cause, "TCP writer task failed");
	}
	info!(%address, "Closed TCP connection");
}

async fn read_pump(
	mut socket: OwnedReadHalf,
	address: SocketAddr,
	serial_inbound: &Sender<Bytes>,
	token: &CancellationToken,
	verbose: bool,
) {
	let mut buffer = BytesMut::with_capacity(READ_CHUNK_SIZE);

	loop {
		buffer.reserve(READ_CHUNK_SIZE);
		let read = tokio::select! {
			biased;

			() = token.cancelled() => return,
			read = socket.read_buf(&mut buffer) => read,
		};

		match read {
			Ok(0) => {
				info!(%address, "TCP client disconnected");
				return;
			}
			Ok(amount) => {
				let chunk = buffer.split().freeze();
				tokio::select! {
					biased;

					() = token.cancelled() => return,
					sent = serial_inbound.send(chunk) => if sent.is_err() {
						debug!(%address, "serial link is gone, dropping TCP client");
						return;
					},
				}
				if verbose {
					info!(%address, bytes = amount, "Enqueued TCP→Serial");
				}
			}
			Err(cause) => {
				warn!(%address, %cause, "Read from TCP client failed");
				return;
			}
		}
	}
}

async fn write_pump(
	mut socket: OwnedWriteHalf,
	mut outbound: Receiver<Bytes>,
	address: SocketAddr,
	token: CancellationToken,
) {
	loop {
		let chunk = tokio::select! {
			biased;

			() = token.cancelled() => break,
			chunk = outbound.recv() => match chunk {
				Some(chunk) => chunk,
				None => break,
			},
		};

		tokio::select! {
			biased;

			() = token.cancelled() => break,
			written = socket.write_all(&chunk) => if let Err(cause) = written {
				warn!(%address, %cause, "Write to TCP client failed");
				token.cancel();
				break;
			},
		}
	}

	_ = socket.shutdown().await;
}

/// If an accept error means the listening socket itself can never accept
/// again.
///
/// Everything else (a peer that went away, a firewall rejecting one
/// connection, running out of descriptors) only affects that one attempt.
#[cfg(unix)]
fn is_listener_dead(cause: &IoError) -> bool {
	matches!(
		cause.raw_os_error(),
		Some(libc::EBADF | libc::EINVAL | libc::ENOTSOCK)
	)
}

#[cfg(not(unix))]
fn is_listener_dead(cause: &IoError) -> bool {
	cause.kind() == std::io::ErrorKind::InvalidInput
}

//! Keep track of every connected TCP client, and fan serial data out to them.

use bytes::Bytes;
use fnv::FnvHashMap;
use std::{
	net::SocketAddr,
	sync::{Mutex, MutexGuard, PoisonError},
};
use tokio::sync::mpsc::{error::TrySendError, Sender};
use tracing::{debug, info, warn};

/// The set of TCP clients that are currently connected, keyed by their
/// remote address.
///
/// This is the one structure that is genuinely shared between many tasks, so
/// it lives behind a single mutex. The lock is only ever held for a single
/// insert, remove, or non-blocking pass over the clients, never across an
/// `.await`.
#[derive(Debug, Default)]
pub struct ClientRegistry {
	clients: Mutex<FnvHashMap<SocketAddr, Sender<Bytes>>>,
	verbose: bool,
}

impl ClientRegistry {
	#[must_use]
	pub fn new(verbose: bool) -> Self {
		Self {
			clients: Mutex::new(FnvHashMap::default()),
			verbose,
		}
	}

	/// Register a newly connected client, and the channel that feeds its
	/// socket.
	pub fn add(&self, address: SocketAddr, outbound: Sender<Bytes>) {
		let total = {
			let mut clients = self.lock();
			if clients.insert(address, outbound).is_some() {
				warn!(%address, "client was registered twice, replacing older registration");
			}
			clients.len()
		};

		if self.verbose {
			info!(%address, total, "Added TCP connection");
		}
	}

	/// Unregister a client.
	///
	/// This drops our half of its outbound channel, so once everything already
	/// queued has been drained its writer sees the channel as closed.
	///
	/// Returns if the client was actually registered.
	pub fn remove(&self, address: &SocketAddr) -> bool {
		let (removed, total) = {
			let mut clients = self.lock();
			let removed = clients.remove(address);
			(removed, clients.len())
		};
		let Some(outbound) = removed else {
			return false;
		};
		drop(outbound);

		if self.verbose {
			info!(%address, total, "Removed TCP connection");
		}
		true
	}

	/// Hand the same chunk to every registered client without ever waiting on
	/// any of them.
	///
	/// A client whose channel is full simply misses this chunk, it never slows
	/// down the caller, or any other client. Cloning [`Bytes`] only bumps a
	/// reference count, so every client shares the one allocation.
	///
	/// Returns how many clients the chunk was handed to.
	pub fn broadcast(&self, chunk: &Bytes) -> usize {
		let clients = self.lock();
		let mut delivered = 0;

		for (address, outbound) in clients.iter() {
			match outbound.try_send(chunk.clone()) {
				Ok(()) => delivered += 1,
				Err(TrySendError::Full(_)) => {
					if self.verbose {
						warn!(%address, bytes = chunk.len(), "Client queue full; dropping broadcast");
					} else {
						debug!(%address, bytes = chunk.len(), "Client queue full; dropping broadcast");
					}
				}
				Err(TrySendError::Closed(_)) => {
					// Its handler is tearing down, and will remove it shortly.
					debug!(%address, "client queue closed; skipping broadcast");
				}
			}
		}

		delivered
	}

	/// The amount of clients currently registered.
	#[must_use]
	pub fn len(&self) -> usize {
		self.lock().len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.lock().is_empty()
	}

	/// If a client with this address is currently registered.
	#[must_use]
	pub fn contains(&self, address: &SocketAddr) -> bool {
		self.lock().contains_key(address)
	}

	/// A poisoned lock only means some other task panicked mid-operation, the
	/// map itself is always left in a usable state.
	fn lock(&self) -> MutexGuard<'_, FnvHashMap<SocketAddr, Sender<Bytes>>> {
		self.clients.lock().unwrap_or_else(PoisonError::into_inner)
	}
}

#[cfg(test)]
mod unit_tests {
	use super::*;
	use tokio::sync::mpsc::channel;

	fn address(port: u16) -> SocketAddr {
		SocketAddr::from(([127, 0, 0, 1], port))
	}

	#[test]
	pub fn add_and_remove_track_membership() {
		let registry = ClientRegistry::new(true);
		let (sender, _receiver) = channel(4);

		registry.add(address(1000), sender);
		assert!(registry.contains(&address(1000)));
		assert_eq!(registry.len(), 1);

		assert!(registry.remove(&address(1000)));
		assert!(
			!registry.remove(&address(1000)),
			"Removing a client twice reported it as being registered!",
		);
		assert!(registry.is_empty());
	}

	#[tokio::test]
	pub async fn removing_closes_the_outbound_channel() {
		let registry = ClientRegistry::new(false);
		let (sender, mut receiver) = channel(4);
		registry.add(address(1001), sender);

		assert_eq!(registry.broadcast(&Bytes::from_static(b"last")), 1);
		registry.remove(&address(1001));

		assert_eq!(receiver.recv().await, Some(Bytes::from_static(b"last")));
		assert_eq!(
			receiver.recv().await,
			None,
			"Outbound channel was still open after the client was removed!",
		);
	}

	#[tokio::test]
	pub async fn saturated_client_never_holds_up_the_others() {
		const CLIENTS: u16 = 4;
		const CHUNKS: usize = 32;
		const SLOW_CAPACITY: usize = 3;

		let registry = ClientRegistry::new(false);
		let mut receivers = Vec::new();
		for port in 0..CLIENTS {
			let (sender, receiver) = channel(CHUNKS);
			registry.add(address(2000 + port), sender);
			receivers.push(receiver);
		}
		// Nobody ever drains this one.
		let (slow_sender, mut slow_receiver) = channel(SLOW_CAPACITY);
		registry.add(address(3000), slow_sender);

		for index in 0..CHUNKS {
			let delivered = registry.broadcast(&Bytes::from(vec![u8::try_from(index).unwrap_or(0)]));
			let expected = if index < SLOW_CAPACITY {
				usize::from(CLIENTS) + 1
			} else {
				usize::from(CLIENTS)
			};
			assert_eq!(delivered, expected, "Unexpected amount of deliveries on chunk {index}");
		}

		for mut receiver in receivers {
			for index in 0..CHUNKS {
				assert_eq!(
					receiver.try_recv().ok(),
					Some(Bytes::from(vec![u8::try_from(index).unwrap_or(0)])),
					"Fast client missed, or reordered chunk {index}!",
				);
			}
			assert!(receiver.try_recv().is_err());
		}

		let mut slow_received = Vec::new();
		while let Ok(chunk) = slow_receiver.try_recv() {
			slow_received.push(chunk);
		}
		assert_eq!(
			slow_received,
			(0..SLOW_CAPACITY)
				.map(|index| Bytes::from(vec![u8::try_from(index).unwrap_or(0)]))
				.collect::<Vec<_>>(),
			"Saturated client should've received only the chunks that fit!",
		);
	}

	#[tokio::test]
	pub async fn broadcast_skips_clients_that_already_hung_up() {
		let registry = ClientRegistry::new(false);
		let (gone_sender, gone_receiver) = channel(4);
		let (live_sender, mut live_receiver) = channel(4);
		registry.add(address(4000), gone_sender);
		registry.add(address(4001), live_sender);
		drop(gone_receiver);

		assert_eq!(registry.broadcast(&Bytes::from_static(b"hi")), 1);
		assert_eq!(live_receiver.recv().await, Some(Bytes::from_static(b"hi")));
	}
}

//! Wire every piece together into one running gateway.

use crate::{
	clients::ClientRegistry,
	config::LinkConfiguration,
	errors::GatewayError,
	serial::{DeviceOpener, SerialLinkManager, SystemSerialOpener},
	server::TcpGatewayServer,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Run a gateway between the serial device described by `config`, and TCP
/// clients connecting to `bind_address`, until `cancel` is cancelled.
///
/// ## Errors
///
/// - If we cannot listen on `bind_address`.
/// - If accepting clients fails in a way we can't recover from.
pub async fn run_gateway(
	config: LinkConfiguration,
	bind_address: &str,
	cancel: CancellationToken,
) -> Result<(), GatewayError> {
	run_gateway_with_opener(config, SystemSerialOpener, bind_address, cancel).await
}

/// The same as [`run_gateway`], but opening the serial device through any
/// [`DeviceOpener`].
///
/// ## Errors
///
/// - If we cannot listen on `bind_address`.
/// - If accepting clients fails in a way we can't recover from.
/// - If the serial manager's task could not be awaited.
pub async fn run_gateway_with_opener(
	config: LinkConfiguration,
	opener: impl DeviceOpener,
	bind_address: &str,
	cancel: CancellationToken,
) -> Result<(), GatewayError> {
	let config = config.normalized();
	info!(
		serial = %config.device_path,
		baud = config.baud_rate,
		tcp = bind_address,
		"Starting serial-to-TCP gateway",
	);

	let clients = Arc::new(ClientRegistry::new(config.verbose));
	let manager = {
		let clients = Arc::clone(&clients);
		Arc::new(SerialLinkManager::new(
			config.clone(),
			opener,
			move |chunk| {
				clients.broadcast(&chunk);
			},
		))
	};
	let server = TcpGatewayServer::bind(
		bind_address,
		Arc::clone(&clients),
		manager.inbound(),
		config.verbose,
	)
	.await?;

	let manager_token = cancel.child_token();
	let manager_task = {
		let manager = Arc::clone(&manager);
		let token = manager_token.clone();
		tokio::spawn(async move { manager.run(token).await })
	};

	let served = server.run(cancel).await;
	manager_token.cancel();
	manager_task.await?;
	served?;

	info!("Gateway stopped");
	Ok(())
}

#[cfg(test)]
mod unit_tests {
	use super::*;
	use crate::test_support::{FakeLine, FakeOpener};
	use std::{net::SocketAddr, time::Duration};
	use tokio::{
		io::{AsyncReadExt, AsyncWriteExt},
		net::{TcpListener, TcpStream},
		time::{sleep, timeout},
	};

	const WAIT: Duration = Duration::from_secs(5);

	/// Grab a free port, and let it go again for the gateway to use.
	async fn free_address() -> SocketAddr {
		let listener = TcpListener::bind("127.0.0.1:0")
			.await
			.expect("Failed to bind loopback");
		listener.local_addr().expect("No local address")
	}

	async fn connect(address: SocketAddr) -> TcpStream {
		timeout(WAIT, async {
			loop {
				if let Ok(stream) = TcpStream::connect(address).await {
					return stream;
				}
				sleep(Duration::from_millis(10)).await;
			}
		})
		.await
		.expect("Gateway never started listening")
	}

	fn test_config() -> LinkConfiguration {
		let mut config = LinkConfiguration::new("fake0", 9600);
		config.read_timeout = Duration::from_millis(20);
		config.reconnect_base = Duration::from_millis(10);
		config.retry_interval = Duration::from_millis(10);
		config
	}

	#[tokio::test]
	pub async fn bytes_flow_both_ways_through_a_flaky_device() {
		let line = FakeLine::new();
		line.fail_next_opens(2);
		let address = free_address().await;
		let cancel = CancellationToken::new();
		let gateway = {
			let opener = FakeOpener::new(&line);
			let cancel = cancel.clone();
			let address = address.to_string();
			tokio::spawn(async move {
				run_gateway_with_opener(test_config(), opener, &address, cancel).await
			})
		};

		let mut client = connect(address).await;
		client.write_all(b"ping").await.expect("Failed to write");
		line.wait_for_written(b"ping", WAIT).await;

		line.feed(b"pong");
		let mut buff = [0_u8; 4];
		timeout(WAIT, client.read_exact(&mut buff))
			.await
			.expect("Timed out waiting for serial data")
			.expect("Failed to read serial data");
		assert_eq!(&buff, b"pong");

		cancel.cancel();
		let result = timeout(WAIT, gateway)
			.await
			.expect("Gateway did not stop after cancellation!")
			.expect("Gateway task panicked!");
		assert!(result.is_ok(), "Gateway stopped with an error: {result:?}");
	}

	#[tokio::test]
	pub async fn failing_to_bind_is_fatal() {
		let holder = TcpListener::bind("127.0.0.1:0")
			.await
			.expect("Failed to bind loopback");
		let address = holder.local_addr().expect("No local address").to_string();
		let line = FakeLine::new();

		let result = timeout(
			WAIT,
			run_gateway_with_opener(
				test_config(),
				FakeOpener::new(&line),
				&address,
				CancellationToken::new(),
			),
		)
		.await
		.expect("Gateway should've failed immediately!");
		assert!(
			matches!(result, Err(GatewayError::NetworkError(_))),
			"Expected a bind failure, got: {result:?}",
		);
		assert_eq!(line.open_attempts(), 0, "Serial device opened before bind!");
	}
}

#![doc = include_str!("../README.md")]
#![allow(
	// I dislike this rule... We import things elsewhere, usually outside of
	// modules themselves.
	clippy::module_name_repetitions,
)]

pub mod clients;
pub mod config;
pub mod errors;
pub mod gateway;
pub mod queue;
pub mod serial;
pub mod server;

#[cfg(test)]
mod test_support;

pub use crate::{
	clients::ClientRegistry,
	config::{BackoffPolicy, LinkConfiguration},
	errors::GatewayError,
	gateway::{run_gateway, run_gateway_with_opener},
	queue::BoundedByteQueue,
	serial::{available_ports, LinkState, SerialLinkManager},
	server::TcpGatewayServer,
};

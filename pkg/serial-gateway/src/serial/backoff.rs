//! The delay between attempts to reopen a serial device.

use crate::config::{BackoffPolicy, LinkConfiguration};
use std::time::Duration;

/// Tracks how long to wait before the next attempt to open the device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectBackoff {
	base: Duration,
	max: Duration,
	retry_interval: Duration,
	policy: BackoffPolicy,
	current: Duration,
}

impl ReconnectBackoff {
	#[must_use]
	pub fn new(config: &LinkConfiguration) -> Self {
		Self {
			base: config.reconnect_base,
			max: config.reconnect_max,
			retry_interval: config.retry_interval,
			policy: config.backoff_policy,
			current: config.reconnect_base,
		}
	}

	/// Get the delay to wait after a failed attempt, and advance to the delay
	/// for the failure after that.
	pub fn next_delay(&mut self) -> Duration {
		let delay = self.current;
		self.current = match self.policy {
			BackoffPolicy::Flat => self.retry_interval,
			BackoffPolicy::Exponential => self.current.saturating_mul(2).min(self.max),
		};
		delay
	}

	/// Go back to the first delay, done every time the device opens.
	pub fn reset(&mut self) {
		self.current = self.base;
	}
}

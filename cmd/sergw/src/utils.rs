//! Utility functions that don't have one place that they should live.

use miette::Report;
use tracing::warn;

/// Add context to a specific error, where you can have like a list of
/// suggestions.
///
/// NOTE: we cannot reassign a reports severity, so your last items severity
///       is where the real severity gets taken.
pub fn add_context_to(
	original_error: Report,
	suggestions: impl DoubleEndedIterator<Item = Report>,
) -> Report {
	let mut latest_error: Option<Report> = None;

	for suggestion in suggestions.rev() {
		if let Some(last_error) = latest_error {
			latest_error = Some(last_error.wrap_err(suggestion));
		} else {
			latest_error = Some(suggestion);
		}
	}

	if let Some(latest) = latest_error {
		latest.wrap_err(original_error)
	} else {
		original_error
	}
}

/// Wait until the OS asks us to shutdown, through ctrl-c or `SIGTERM`.
///
/// Returns which signal was received.
pub async fn shutdown_signal() -> &'static str {
	let ctrl_c = async {
		if let Err(cause) = tokio::signal::ctrl_c().await {
			warn!(?cause, "could not listen for ctrl-c, only other signals will stop us");
			std::future::pending::<()>().await;
		}
	};

	#[cfg(unix)]
	let terminate = async {
		use tokio::signal::unix::{signal, SignalKind};

		match signal(SignalKind::terminate()) {
			Ok(mut stream) => {
				stream.recv().await;
			}
			Err(cause) => {
				warn!(?cause, "could not listen for SIGTERM, only other signals will stop us");
				std::future::pending::<()>().await;
			}
		}
	};
	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		() = ctrl_c => "ctrl-c",
		() = terminate => "terminate",
	}
}

//! The list of environment variables that influence behavior for `sergw`.

use once_cell::sync::Lazy;
use std::env::var as env_var;

/// Another way of configuring `sergw` to output it's logs in JSON.
///
/// Environment Variable Name: `SERGW_OUTPUT_JSON`
/// Expected Values: ("1" or "0"), and ("true" or "false")
/// Type: Boolean
pub static USE_JSON_OUTPUT: Lazy<bool> =
	Lazy::new(|| env_var("SERGW_OUTPUT_JSON").map_or(false, |var| var == "1" || var == "true"));

/// The serial device to use for `listen` when `--serial` isn't passed.
///
/// Environment Variable Name: `SERGW_SERIAL_PORT`
/// Expected Values: A device path, or COM port name.
/// Type: String
pub static SERIAL_PORT: Lazy<Option<String>> = Lazy::new(|| {
	env_var("SERGW_SERIAL_PORT")
		.ok()
		.filter(|value| !value.is_empty())
});

//! Types defining the different options when opening a printer.

use super::Printer;
use crate::{backend::Serial, error::GcodeError};
use std::time::Duration;

/// Options for configuring and opening a printer's serial port.
///
/// ## Example
///
/// ```rust
/// # use pipette::gcode::OpenSerialOptions;
/// # use std::time::Duration;
/// # fn wrapper() -> Result<(), Box<dyn std::error::Error>> {
/// let mut printer = OpenSerialOptions::new()
///     .baud_rate(250_000)
///     .timeout(Some(Duration::from_secs(2)))
///     .open("/dev/ttyUSB0")?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct OpenSerialOptions {
	/// The custom baud rate
	baud_rate: u32,
	/// The custom timeout
	timeout: Option<Duration>,
}

impl OpenSerialOptions {
	/// The default baud rate: 115,200.
	pub const DEFAULT_BAUD_RATE: u32 = 115_200;

	/// The default read timeout: 5 seconds.
	pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

	/// Create a blank set of options ready for configuration.
	///
	/// The default baud rate and read timeout are 115,200 and 5 seconds, respectively.
	///
	/// Equivalent to [`default`](OpenSerialOptions::default).
	pub fn new() -> Self {
		OpenSerialOptions {
			baud_rate: OpenSerialOptions::DEFAULT_BAUD_RATE,
			timeout: Some(OpenSerialOptions::DEFAULT_TIMEOUT),
		}
	}

	/// Set a custom baud rate.
	///
	/// The default is 115,200.
	pub fn baud_rate(&mut self, baud_rate: u32) -> &mut Self {
		self.baud_rate = baud_rate;
		self
	}

	/// Set a custom read timeout.
	///
	/// If duration is `None`, reads will block indefinitely. The default is 5
	/// seconds. Commands use their own deadlines; this is the timeout outside
	/// of them.
	pub fn timeout(&mut self, duration: Option<Duration>) -> &mut Self {
		self.timeout = duration;
		self
	}

	/// Open the printer at the specified path with the custom options.
	///
	/// A device that cannot be opened or configured is reported as
	/// [`GcodeError::Connection`].
	pub fn open(&self, path: &str) -> Result<Printer<Serial>, GcodeError> {
		Ok(Printer::from_backend(Serial::open(
			path,
			self.baud_rate,
			self.timeout,
		)?))
	}
}

impl Default for OpenSerialOptions {
	fn default() -> Self {
		OpenSerialOptions::new()
	}
}

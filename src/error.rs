//! Error types.
//!
//! Each error is represented by a unique type that implements [`std::error::Error`].
//! However, most APIs return more than one kind of error and so will return one
//! of the higher level [enums](#enums), such as [`GcodeError`], [`ServoError`],
//! or [`Error`]. The error types are convertible to the higher level enums,
//! allowing them to be used with `?`:
//!
//! ```
//! use pipette::error::{ConnectionError, Error};
//!
//! fn foo() -> Result<(), ConnectionError> {
//!     // ...
//! # unimplemented!();
//! }
//!
//! fn bar() -> Result<(), Error> {
//!     foo()?;
//!     // ...
//! # Ok(())
//! }
//! ```
//!
//! Only failures that prevent an operation from completing are errors. A
//! printer that never acknowledges a line, or a servo that does not reach its
//! goal in time, is reported as a flag in the operation's result instead.

/// Implement Error and Display traits for the specified type.
///
/// After the type define the format string and any arguments it should
/// reference after `self =>` (to abide by macro hygiene rules).
macro_rules! impl_error_display {
	(
		$name:path,
		$self:ident =>
		$display:literal
		$(,
			$($arg:expr),+
		)?
	) => {
		impl std::error::Error for $name {}

		impl std::fmt::Display for $name {
			fn fmt(&$self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
				write!(
					f,
					$display
					$(,
						$($arg),+
					)?
				)
			}
		}
	};
}

macro_rules! impl_is_timeout {
	($name:ident) => {
		impl $name {
			/// A convenience function for determining if the error is due to the
			/// port timing out.
			pub fn is_timeout(&self) -> bool {
				matches!(self, $name::Io(e) if e.kind() == std::io::ErrorKind::TimedOut)
			}
		}
	};
}

/// Define error enums that contain concrete error types (not other error enums).
///
/// From and TryFrom traits will be implemented for the enum and it's underlying
/// errors. The enum's Display implementation will defer to the underlying errors'
/// Display implementations.
///
/// Simple implementations of From and TryFrom with other error enums can be
/// added by appending a succinct impl block, which assumes that:
///   * it is being implemented for this error enum,
///   * each variant has a single tuple value, and can be converted to the value
///     in this enum with its own From implementation.
///
/// ```compile_fail
/// # // This fails to compile because the macro is not exported.
/// error_enum!{
///     // This defines the enum and From/TryFrom between ThisError and A and B.
///     #[non_exhaustive]
///     pub enum ThisError {
///         VariantA(A),
///         VariantB(B),
///         // ...
///     }
///
///     // This implements a simple From/TryFrom between ThisError and OtherType.
///     impl From<OtherType> {
///         FromVariantA => VariantA,
///         // ...
///     }
/// }
/// ```
macro_rules! error_enum {
	(
		$(#[$attr:meta])*
		pub enum $name:ident {
			$(
				$variant:ident($inner:path)
			),+
			$(,)?
		}
		// Additional information for From/TryFrom impl blocks.
		$(
			impl From<$from_t:ident>
			{
				$($from_variant:ident => $to_variant:ident),+
				$(,)?
			}
		)*
	) => {
		// Define the error enum itself
		$(
			#[$attr]
		)*
		#[allow(missing_docs)]
		pub enum $name {
			$(
				$variant($inner)
			),+
		}

		impl std::error::Error for $name {}

		// Defer the display to the inner error type
		impl std::fmt::Display for $name {
			fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
				match self {
					$(
						$name::$variant(e) => e.fmt(f)
					),+
				}
			}
		}

		// Allow the enum to be convertible from an infallible error
		impl From<std::convert::Infallible> for $name {
			fn from(_: std::convert::Infallible) -> Self {
				unreachable!();
			}
		}

		// Conversions with underlying errors
		$(
			impl From<$inner> for $name {
				fn from(other: $inner) -> Self {
					$name::$variant(other)
				}
			}

			impl TryFrom<$name> for $inner {
				type Error = $name;
				fn try_from(other: $name) -> Result<Self, Self::Error> {
					match other {
						$name::$variant(value) => Ok(value),
						#[allow(unreachable_patterns)]
						value => Err(value)
					}
				}
			}
		)+

		// Conversions from other enum errors
		$(
			impl From<$from_t> for $name {
				fn from(other: $from_t) -> Self {
					match other {
						$($from_t::$from_variant(e) => $name::$to_variant(From::from(e))),+
					}
				}
			}

			impl TryFrom<$name> for $from_t {
				type Error = $name;
				fn try_from(other: $name) -> Result<Self, Self::Error> {
					match other {
						$(
							$name::$to_variant(e) => Ok($from_t::$from_variant(From::from(e)))
						),+
						,
						#[allow(unreachable_patterns)]
						_ => Err(other)
					}
				}
			}
		)*
	};
}

#[cfg(feature = "gcode")]
mod gcode;
#[cfg(feature = "gcode")]
pub use gcode::*;

#[cfg(feature = "servo")]
mod servo;
#[cfg(feature = "servo")]
pub use servo::*;

#[cfg(all(feature = "gcode", feature = "servo"))]
mod all;
#[cfg(all(feature = "gcode", feature = "servo"))]
pub use all::*;

/// The step of opening a device that failed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ConnectionStage {
	/// The device could not be opened.
	Open,
	/// The device was opened but the baud rate could not be applied.
	BaudRate,
}

/// The details behind a [`ConnectionError`].
#[derive(Debug)]
struct ConnectionErrorInner {
	path: Box<str>,
	baud_rate: u32,
	stage: ConnectionStage,
	kind: serialport::ErrorKind,
	description: Box<str>,
}

/// A serial device could not be opened or configured at the requested baud
/// rate. The session never started.
#[derive(Debug)]
pub struct ConnectionError(Box<ConnectionErrorInner>);

impl_error_display! {
	ConnectionError,
	self => "failed to {} {} at {} baud: {}",
	match self.0.stage {
		ConnectionStage::Open => "open",
		ConnectionStage::BaudRate => "set the baud rate of",
	},
	self.0.path,
	self.0.baud_rate,
	self.0.description
}

impl ConnectionError {
	/// Create a new error from the `serialport` error that caused it.
	pub(crate) fn new(
		path: &str,
		baud_rate: u32,
		stage: ConnectionStage,
		error: serialport::Error,
	) -> Self {
		ConnectionError(Box::new(ConnectionErrorInner {
			path: path.into(),
			baud_rate,
			stage,
			kind: error.kind(),
			description: error.description.into_boxed_str(),
		}))
	}

	/// The path of the device that could not be opened.
	pub fn path(&self) -> &str {
		&self.0.path
	}

	/// The requested baud rate.
	pub fn baud_rate(&self) -> u32 {
		self.0.baud_rate
	}

	/// Which step of opening the device failed.
	pub fn stage(&self) -> ConnectionStage {
		self.0.stage
	}

	/// Whether the device is missing or already in use by another process.
	pub fn is_unavailable(&self) -> bool {
		matches!(self.0.kind, serialport::ErrorKind::NoDevice)
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn connection_error_display() {
		let err = ConnectionError::new(
			"/dev/ttyUSB9",
			115_200,
			ConnectionStage::Open,
			serialport::Error::new(serialport::ErrorKind::NoDevice, "No such file or directory"),
		);
		assert_eq!(
			err.to_string(),
			"failed to open /dev/ttyUSB9 at 115200 baud: No such file or directory"
		);
		assert!(err.is_unavailable());
		assert_eq!(err.path(), "/dev/ttyUSB9");
		assert_eq!(err.baud_rate(), 115_200);

		let err = ConnectionError::new(
			"/dev/ttyACM0",
			3,
			ConnectionStage::BaudRate,
			serialport::Error::new(serialport::ErrorKind::InvalidInput, "invalid baud"),
		);
		assert_eq!(err.stage(), ConnectionStage::BaudRate);
		assert!(!err.is_unavailable());
		assert!(err
			.to_string()
			.starts_with("failed to set the baud rate of /dev/ttyACM0"));
	}
}

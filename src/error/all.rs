//! Error types covering both devices.

use super::*;

error_enum! {
	/// Any error returned by this library.
	///
	/// This is what the [`Service`](crate::service::Service) reports to its
	/// callers, who typically map every variant to a server error.
	#[derive(Debug)]
	#[non_exhaustive]
	#[cfg_attr(
		all(doc, feature = "doc_cfg"),
		doc(cfg(all(feature = "gcode", feature = "servo")))
	)]
	pub enum Error {
		Connection(ConnectionError),
		Io(std::io::Error),
		Transaction(TransactionError),
	}

	impl From<GcodeError> {
		Connection => Connection,
		Io => Io,
	}

	impl From<ServoError> {
		Connection => Connection,
		Io => Io,
		Transaction => Transaction,
	}
}
impl_is_timeout! { Error }

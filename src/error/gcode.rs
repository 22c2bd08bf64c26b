//! Error types for the G-code line protocol.

use super::ConnectionError;

error_enum! {
	/// Any error returned by the [`gcode`](crate::gcode) module.
	///
	/// A command that is never acknowledged is not an error; see
	/// [`Transcript::terminated`](crate::gcode::Transcript::terminated).
	#[derive(Debug)]
	#[non_exhaustive]
	#[cfg_attr(all(doc, feature = "doc_cfg"), doc(cfg(feature = "gcode")))]
	pub enum GcodeError {
		Connection(ConnectionError),
		Io(std::io::Error),
	}
}
impl_is_timeout! { GcodeError }

//! Types that can exchange (read/write) bytes with a connected device.
//!
//! The [`Backend`] trait represents all such types.

use std::io;
use std::time::Duration;

use crate::error::{ConnectionError, ConnectionStage};
use serialport as sp;

#[cfg(windows)]
use sp::COMPort as ExternSerial;
use sp::SerialPort;
#[cfg(unix)]
use sp::TTYPort as ExternSerial;

/// The placeholder name for a backend that doesn't have a name.
pub(crate) const UNKNOWN_BACKEND_NAME: &str = "<unknown backend>";

/// Types that allow reading and writing bytes with a connected device.
pub trait Backend: io::Read + io::Write + private::Sealed {
	/// Set the read timeout.
	///
	/// If timeout is `None`, reads will block indefinitely.
	fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), io::Error>;

	/// Get the read timeout.
	///
	/// If timeout is `None`, reads will block indefinitely.
	fn read_timeout(&self) -> Result<Option<Duration>, io::Error>;

	/// Discard any bytes that have been received but not yet read.
	fn clear_input(&mut self) -> Result<(), io::Error>;

	/// Get the "name" of the backend.
	///
	/// This can be in any format, but should uniquely identify the backend
	/// instance.
	fn name(&self) -> Option<String>;
}

impl<C: Backend + ?Sized> Backend for Box<C> {
	fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), io::Error> {
		(**self).set_read_timeout(timeout)
	}
	fn read_timeout(&self) -> Result<Option<Duration>, io::Error> {
		(**self).read_timeout()
	}
	fn clear_input(&mut self) -> Result<(), io::Error> {
		(**self).clear_input()
	}
	fn name(&self) -> Option<String> {
		(**self).name()
	}
}

impl<C: Backend + ?Sized> Backend for &mut C {
	fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), io::Error> {
		(**self).set_read_timeout(timeout)
	}
	fn read_timeout(&self) -> Result<Option<Duration>, io::Error> {
		(**self).read_timeout()
	}
	fn clear_input(&mut self) -> Result<(), io::Error> {
		(**self).clear_input()
	}
	fn name(&self) -> Option<String> {
		(**self).name()
	}
}

/// A platform agnostic serial port backend.
//
// `serialport` exposes `COMPort` and `TTYPort` for windows and unix. Only one
// exists on any given platform, so wrap whichever it is in a newtype rather
// than paying for dynamic dispatch or threading a type parameter everywhere.
#[derive(Debug)]
pub struct Serial(pub(crate) ExternSerial);

impl Serial {
	/// A baud rate every serial port accepts, used while opening.
	const OPENING_BAUD_RATE: u32 = 9_600;

	/// Open the serial port at `path` (8N1, no flow control) at `baud_rate`.
	///
	/// Failing to apply the baud rate is reported separately from failing to
	/// open the port, and the port is closed before the error is returned.
	pub(crate) fn open(
		path: &str,
		baud_rate: u32,
		timeout: Option<Duration>,
	) -> Result<Serial, ConnectionError> {
		// The baud rate passed to new is not reliably applied, so open at a
		// rate every port accepts and set the requested one afterwards.
		let mut port = sp::new(path, Serial::OPENING_BAUD_RATE)
			.data_bits(sp::DataBits::Eight)
			.parity(sp::Parity::None)
			.flow_control(sp::FlowControl::None)
			.stop_bits(sp::StopBits::One)
			// The serialport API does not support infinite timeouts, so simply
			// set the timeout to the largest possible duration if `timeout` is
			// `None`, which is practically infinite.
			.timeout(timeout.unwrap_or(Duration::MAX))
			.open_native()
			.map_err(|err| ConnectionError::new(path, baud_rate, ConnectionStage::Open, err))?;
		if let Err(err) = port.set_baud_rate(baud_rate) {
			drop(port);
			return Err(ConnectionError::new(
				path,
				baud_rate,
				ConnectionStage::BaudRate,
				err,
			));
		}
		log::debug!("opened {path} at {baud_rate} baud");
		Ok(Serial(port))
	}
}

impl io::Read for Serial {
	fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
		self.0.read(buf)
	}
}

impl io::Write for Serial {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		self.0.write(buf)
	}

	fn flush(&mut self) -> io::Result<()> {
		self.0.flush()
	}
}

impl Backend for Serial {
	fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), io::Error> {
		// The serialport API does not support infinite timeouts, so simply set
		// the timeout to the largest possible duration if `timeout` is `None`,
		// which is practically infinite.
		Ok(self.0.set_timeout(timeout.unwrap_or(Duration::MAX))?)
	}
	fn read_timeout(&self) -> Result<Option<Duration>, io::Error> {
		Ok(Some(self.0.timeout()))
	}
	fn clear_input(&mut self) -> Result<(), io::Error> {
		Ok(self.0.clear(sp::ClearBuffer::Input)?)
	}
	fn name(&self) -> Option<String> {
		self.0.name()
	}
}

/// A function that produces the bytes a simulated device sends back after
/// each write.
#[cfg(any(test, feature = "mock"))]
pub type Responder = Box<dyn FnMut(&[u8]) -> Vec<u8> + Send>;

/// A mock backend for use in testing.
///
/// It has the following features:
///   * It records all data written to it.
///   * It can be filled with data for reading, either directly or by a
///     [`Responder`] that is called with every write.
///   * Reading with no data available waits for the read timeout (capped at
///     one second) and then fails with [`io::ErrorKind::TimedOut`], like a
///     silent device would.
///   * Specific errors can be inserted for calls to `read`, `write`, `flush`,
///     `set_read_timeout`, and `clear_input`.
#[cfg(any(test, feature = "mock"))]
#[cfg_attr(all(doc, feature = "doc_cfg"), doc(cfg(feature = "mock")))]
pub struct Mock {
	/// The buffer data is read from
	buffer: std::collections::VecDeque<u8>,
	/// Everything written so far
	written: Vec<u8>,
	/// Generates data to read after every write, if set.
	responder: Option<Responder>,
	/// The error to surface on the next read, if any. It is only surfaced once.
	read_error: Option<io::Error>,
	/// The error to surface on the next write, if any. It is only surfaced once.
	write_error: Option<io::Error>,
	/// The error to surface on the next flush, if any. It is only surfaced once.
	flush_error: Option<io::Error>,
	/// The error to surface on the next set_read_timeout, if any. It is only surfaced once.
	set_read_timeout_error: Option<io::Error>,
	/// The error to surface on the next clear_input, if any. It is only surfaced once.
	clear_input_error: Option<io::Error>,
	/// How long a read waits when there is no data.
	read_timeout: Option<Duration>,
}

#[cfg(any(test, feature = "mock"))]
impl Mock {
	/// The longest a read will wait before reporting a timeout.
	const MAX_SIMULATED_WAIT: Duration = Duration::from_secs(1);

	/// Create a new Mock backend.
	pub fn new() -> Self {
		Mock {
			buffer: std::collections::VecDeque::new(),
			written: Vec::new(),
			responder: None,
			read_error: None,
			write_error: None,
			flush_error: None,
			set_read_timeout_error: None,
			clear_input_error: None,
			read_timeout: Some(Duration::ZERO),
		}
	}
	/// Create a new Mock backend that answers every write with `responder`.
	pub fn with_responder<F>(responder: F) -> Self
	where
		F: FnMut(&[u8]) -> Vec<u8> + Send + 'static,
	{
		let mut mock = Mock::new();
		mock.set_responder(responder);
		mock
	}
	/// Append data to the read buffer.
	///
	/// The data is not validated in any way.
	pub fn push<T: AsRef<[u8]>>(&mut self, bytes: T) {
		self.buffer.extend(bytes.as_ref());
	}
	/// Clear the read buffer.
	pub fn clear(&mut self) {
		self.buffer.clear();
	}
	/// Whether the mock has any data available or not
	pub fn is_empty(&self) -> bool {
		self.buffer.is_empty()
	}
	/// Set the function that generates data after every write.
	pub fn set_responder<F>(&mut self, responder: F)
	where
		F: FnMut(&[u8]) -> Vec<u8> + Send + 'static,
	{
		self.responder = Some(Box::new(responder));
	}
	/// All the bytes written to the mock so far.
	pub fn written(&self) -> &[u8] {
		&self.written
	}
	/// Set the error for the next `read`, if any.
	pub fn read_error(&mut self, err: Option<io::Error>) {
		self.read_error = err;
	}
	/// Set the error for the next `write`, if any.
	pub fn write_error(&mut self, err: Option<io::Error>) {
		self.write_error = err;
	}
	/// Set the error for the next `flush`, if any.
	pub fn flush_error(&mut self, err: Option<io::Error>) {
		self.flush_error = err;
	}
	/// Set the error for the next `set_read_timeout`, if any.
	pub fn set_read_timeout_error(&mut self, err: Option<io::Error>) {
		self.set_read_timeout_error = err;
	}
	/// Set the error for the next `clear_input`, if any.
	pub fn clear_input_error(&mut self, err: Option<io::Error>) {
		self.clear_input_error = err;
	}
}

#[cfg(any(test, feature = "mock"))]
impl Default for Mock {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(any(test, feature = "mock"))]
impl std::fmt::Debug for Mock {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Mock")
			.field("buffered", &self.buffer.len())
			.field("written", &self.written.len())
			.field("responder", &self.responder.is_some())
			.field("read_timeout", &self.read_timeout)
			.finish_non_exhaustive()
	}
}

#[cfg(any(test, feature = "mock"))]
impl Backend for Mock {
	fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), io::Error> {
		if let Some(err) = self.set_read_timeout_error.take() {
			Err(err)
		} else {
			self.read_timeout = timeout;
			Ok(())
		}
	}

	fn read_timeout(&self) -> Result<Option<Duration>, io::Error> {
		Ok(self.read_timeout)
	}

	fn clear_input(&mut self) -> Result<(), io::Error> {
		if let Some(err) = self.clear_input_error.take() {
			Err(err)
		} else {
			self.buffer.clear();
			Ok(())
		}
	}

	fn name(&self) -> Option<String> {
		Some(format!("<mock 0x{:x}>", std::ptr::from_ref(self) as usize))
	}
}

#[cfg(any(test, feature = "mock"))]
impl io::Read for Mock {
	fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
		if let Some(err) = self.read_error.take() {
			return Err(err);
		}
		if self.buffer.is_empty() {
			// A real device with nothing to say makes the read block until
			// the timeout expires.
			let wait = self
				.read_timeout
				.unwrap_or(Mock::MAX_SIMULATED_WAIT)
				.min(Mock::MAX_SIMULATED_WAIT);
			std::thread::sleep(wait);
			return Err(io::Error::new(
				io::ErrorKind::TimedOut,
				"Simulated timeout error",
			));
		}
		let mut count = 0;
		while count < buf.len() {
			match self.buffer.pop_front() {
				Some(byte) => {
					buf[count] = byte;
					count += 1;
				}
				None => break,
			}
		}
		Ok(count)
	}
}

#[cfg(any(test, feature = "mock"))]
impl io::Write for Mock {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		if let Some(err) = self.write_error.take() {
			return Err(err);
		}
		self.written.extend_from_slice(buf);
		if let Some(responder) = self.responder.as_mut() {
			let reply = (responder)(buf);
			self.buffer.extend(reply);
		}
		Ok(buf.len())
	}

	fn flush(&mut self) -> io::Result<()> {
		if let Some(err) = self.flush_error.take() {
			Err(err)
		} else {
			Ok(())
		}
	}
}

mod private {
	pub trait Sealed {}

	impl Sealed for super::Serial {}
	#[cfg(any(test, feature = "mock"))]
	impl Sealed for super::Mock {}
	impl<C: super::Backend + ?Sized> Sealed for Box<C> {}
	impl<C: super::Backend + ?Sized> Sealed for &mut C {}
}

#[cfg(test)]
mod test {
	use super::*;
	use std::io::{Read as _, Write as _};

	#[test]
	fn mock_responder_answers_writes() {
		let mut mock = Mock::with_responder(|written| {
			let mut reply = written.to_vec();
			reply.reverse();
			reply
		});
		mock.write_all(b"abc").unwrap();
		assert_eq!(mock.written(), b"abc");

		let mut buf = [0u8; 3];
		mock.read_exact(&mut buf).unwrap();
		assert_eq!(&buf, b"cba");
		assert!(mock.is_empty());
	}

	#[test]
	fn mock_clear_input_discards_pending_data() {
		let mut mock = Mock::new();
		mock.push(b"chatter");
		mock.clear_input().unwrap();
		assert!(mock.is_empty());

		mock.clear_input_error(Some(io::Error::other("busy")));
		assert!(mock.clear_input().is_err());
		assert!(mock.clear_input().is_ok());
	}

	#[test]
	fn mock_times_out_when_empty() {
		let mut mock = Mock::new();
		mock.set_read_timeout(Some(Duration::from_millis(20)))
			.unwrap();
		let start = std::time::Instant::now();
		let mut buf = [0u8; 1];
		let err = mock.read(&mut buf).unwrap_err();
		assert_eq!(err.kind(), io::ErrorKind::TimedOut);
		assert!(start.elapsed() >= Duration::from_millis(20));
	}
}

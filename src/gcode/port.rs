//! A printer connection for exchanging G-code lines.

#[cfg(any(test, feature = "mock"))]
use crate::backend::Mock;
use crate::{
	backend::{Backend, Serial, UNKNOWN_BACKEND_NAME},
	error::GcodeError,
	gcode::{OpenSerialOptions, ResponseLine, Transcript},
	timeout_guard::TimeoutGuard,
};
use std::{
	io,
	time::{Duration, Instant},
};

/// The command that makes the printer finish all queued moves before
/// acknowledging.
pub const MOTION_BARRIER: &str = "M400";

/// The shortest read timeout used while waiting for a line.
const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

/// The most bytes requested from the backend per read.
const READ_CHUNK: usize = 256;

/// A connection to a printer that speaks G-code over a serial line.
///
/// See the [`gcode`](crate::gcode) module documentation for details on how to
/// use a `Printer`.
#[derive(Debug)]
pub struct Printer<B> {
	/// The backend to transmit/receive lines with
	backend: B,
	/// If populated, the error that has "poisoned" the printer. This error
	/// MUST be reported before the printer is used for communication again.
	///
	/// A printer becomes "poisoned" when an error occurs that
	///  * cannot be recovered from,
	///  * panicking is ill advised,
	///  * and it is safe to delay reporting of the error until the next attempt
	///    to communicate over the port.
	///
	/// For instance, if a [`TimeoutGuard`] cannot restore the original timeout
	/// in its Drop implementation, rather than panicking (which would almost
	/// certainly cause the program to abort rather than unwind the stack) it
	/// can poison the printer.
	poison: Option<io::Error>,
	/// Received bytes that do not yet form a complete line.
	pending: Vec<u8>,
	/// Whether input received before the first command has been discarded.
	discarded: bool,
}

impl Printer<Serial> {
	/// Open the printer at the specified path using the default options.
	///
	/// Alternatively, use [`OpenSerialOptions`] to customize how the printer is opened.
	///
	/// ## Example
	///
	/// ```rust
	/// # use pipette::gcode::Printer;
	/// # fn wrapper() -> Result<(), Box<dyn std::error::Error>> {
	/// let mut printer = Printer::open_serial("/dev/ttyUSB0")?;
	/// # Ok(())
	/// # }
	/// ```
	pub fn open_serial(path: &str) -> Result<Printer<Serial>, GcodeError> {
		OpenSerialOptions::new().open(path)
	}
}

#[cfg(any(test, feature = "mock"))]
#[cfg_attr(all(doc, feature = "doc_cfg"), doc(cfg(feature = "mock")))]
impl Printer<Mock> {
	/// Open a mock printer.
	pub fn open_mock() -> Printer<Mock> {
		Printer::from_backend(Mock::new())
	}
}

impl<B: Backend> Printer<B> {
	/// Get a `Printer` from the given backend.
	pub fn from_backend(backend: B) -> Printer<B> {
		Printer {
			backend,
			poison: None,
			pending: Vec::new(),
			discarded: false,
		}
	}

	/// Get a reference to the underlying backend.
	pub fn backend(&self) -> &B {
		&self.backend
	}

	/// Get a mutable reference to the underlying backend.
	pub fn backend_mut(&mut self) -> &mut B {
		&mut self.backend
	}

	/// Check if the printer is poisoned and report the error if it exists.
	fn check_poisoned(&mut self) -> Result<(), io::Error> {
		if let Some(poison) = self.poison.take() {
			Err(poison)
		} else {
			Ok(())
		}
	}

	fn backend_name(&self) -> String {
		self.backend
			.name()
			.unwrap_or_else(|| UNKNOWN_BACKEND_NAME.to_string())
	}

	/// Discard everything received so far and not yet read.
	///
	/// Printers often print start-up messages when the port is opened. This
	/// is done automatically before the first command, but can be repeated.
	pub fn discard_input(&mut self) -> Result<(), GcodeError> {
		self.check_poisoned()?;
		self.backend.clear_input()?;
		if !self.pending.is_empty() {
			log::debug!(
				"{} discarding partial line {:?}",
				self.backend_name(),
				String::from_utf8_lossy(&self.pending)
			);
		}
		self.pending.clear();
		self.discarded = true;
		Ok(())
	}

	/// Send one command line and read until it is acknowledged or `timeout`
	/// passes.
	///
	/// Every non-empty line received is recorded in the transcript, including
	/// the `ok` or `error` line that ends the command. If no such line arrives
	/// in time the transcript is returned with
	/// [`terminated`](Transcript::terminated) set to `false`.
	///
	/// Surrounding whitespace is removed from `line` before sending. A blank
	/// line is not sent and produces an empty transcript.
	///
	/// ## Example
	///
	/// ```
	/// # use pipette::{backend::Backend, gcode::Printer};
	/// # use std::time::Duration;
	/// # fn wrapper<B: Backend>(mut printer: Printer<B>) -> Result<(), Box<dyn std::error::Error>> {
	/// let transcript = printer.command("M105", Duration::from_secs(2))?;
	/// for line in transcript.lines() {
	///     println!("{line}");
	/// }
	/// # Ok(())
	/// # }
	/// ```
	pub fn command(&mut self, line: &str, timeout: Duration) -> Result<Transcript, GcodeError> {
		let line = line.trim();
		if line.is_empty() {
			return Ok(Transcript::default());
		}
		if !self.discarded {
			self.discard_input()?;
		}
		self.check_poisoned()?;

		// A timeout too long to represent as a deadline never expires.
		let deadline = Instant::now().checked_add(timeout);
		log::debug!("{} TX: {line:?}", self.backend_name());
		let mut frame = Vec::with_capacity(line.len() + 1);
		frame.extend_from_slice(line.as_bytes());
		frame.push(b'\n');
		self.backend.write_all(&frame)?;
		self.backend.flush()?;

		let mut transcript = Transcript::default();
		while let Some(response) = self.next_line(deadline)? {
			transcript.push(response);
			if transcript.terminated() {
				return Ok(transcript);
			}
		}
		log::debug!(
			"{} no acknowledgement for {line:?} within {timeout:?}",
			self.backend_name()
		);
		Ok(transcript)
	}

	/// Send every non-blank line of `text` in order, each with its own
	/// `per_line_timeout`.
	///
	/// A line that is not acknowledged in time is abandoned and the next line
	/// is sent anyway. All lines received are returned in arrival order.
	///
	/// ## Example
	///
	/// ```
	/// # use pipette::{backend::Backend, gcode::Printer};
	/// # use std::time::Duration;
	/// # fn wrapper<B: Backend>(mut printer: Printer<B>) -> Result<(), Box<dyn std::error::Error>> {
	/// let responses = printer.send_block("G28\nG1 X10 Y10 F3000\n", Duration::from_secs(5))?;
	/// # Ok(())
	/// # }
	/// ```
	pub fn send_block(
		&mut self,
		text: &str,
		per_line_timeout: Duration,
	) -> Result<Vec<ResponseLine>, GcodeError> {
		let mut responses = Vec::new();
		for line in text.lines().map(str::trim).filter(|line| !line.is_empty()) {
			let transcript = self.command(line, per_line_timeout)?;
			if !transcript.terminated() {
				log::warn!("{line:?} was not acknowledged within {per_line_timeout:?}");
			}
			responses.extend(transcript.into_lines());
		}
		Ok(responses)
	}

	/// Send the [`MOTION_BARRIER`] command and wait up to `timeout` for it to
	/// be acknowledged, which happens once all queued moves have finished.
	///
	/// Not finishing in time is reported with
	/// [`terminated`](Transcript::terminated) set to `false`, not as an error.
	pub fn wait_for_motion_complete(
		&mut self,
		timeout: Duration,
	) -> Result<Transcript, GcodeError> {
		self.command(MOTION_BARRIER, timeout)
	}

	/// Read the next non-empty line, or `None` if `deadline` passes first.
	///
	/// Each read waits at most until the deadline, if there is one. A partial
	/// line is kept and completed by later reads.
	fn next_line(&mut self, deadline: Option<Instant>) -> Result<Option<ResponseLine>, GcodeError> {
		loop {
			if let Some(end) = self.pending.iter().position(|&byte| byte == b'\n') {
				let raw: Vec<u8> = self.pending.drain(..=end).collect();
				let text = String::from_utf8_lossy(&raw);
				let text = text.trim();
				if text.is_empty() {
					continue;
				}
				log::debug!("{} RX: {text:?}", self.backend_name());
				return Ok(Some(ResponseLine::new(text)));
			}

			let remaining = match deadline {
				Some(deadline) => {
					let now = Instant::now();
					if now >= deadline {
						return Ok(None);
					}
					Some((deadline - now).max(MIN_READ_TIMEOUT))
				}
				None => None,
			};
			let mut buf = [0u8; READ_CHUNK];
			let read = {
				let mut guard = self.timeout_guard(remaining)?;
				guard.backend.read(&mut buf)
			};
			match read {
				Ok(count) => self.pending.extend_from_slice(&buf[..count]),
				Err(err) if err.kind() == io::ErrorKind::TimedOut => {}
				Err(err) => return Err(err.into()),
			}
		}
	}

	/// Set the printer's read timeout and return a "scope guard" that will
	/// reset the timeout when it goes out of scope.
	///
	/// While the guard is in scope, the printer can only be accessed through
	/// the guard. However, because the guard implements
	/// [`Deref`](std::ops::Deref) and [`DerefMut`](std::ops::DerefMut) callers
	/// can treat the guard as the printer.
	///
	/// ## Example
	/// ```rust
	/// # use pipette::{error::GcodeError, gcode::Printer, backend::Backend};
	/// # use std::time::Duration;
	/// # fn helper<B: Backend>(mut printer: Printer<B>) -> Result<(), GcodeError> {
	/// {
	///     let mut guard = printer.timeout_guard(Some(Duration::from_secs(60)))?;
	///     // Reads outside of a command's deadline use a 60 second timeout here.
	///     guard.command("G28", Duration::from_secs(60))?;
	/// }  // The guard is dropped and the timeout is reset.
	/// # Ok(())
	/// # }
	/// ```
	pub fn timeout_guard(
		&mut self,
		timeout: Option<Duration>,
	) -> Result<TimeoutGuard<'_, B, Self>, io::Error> {
		self.check_poisoned()?;
		TimeoutGuard::new(self, timeout)
	}
}

impl<B: Backend> crate::timeout_guard::Port<B> for Printer<B> {
	fn backend_mut(&mut self) -> &mut B {
		&mut self.backend
	}

	fn poison(&mut self, error: io::Error) {
		self.poison = Some(error);
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::{error::ConnectionStage, gcode::LineKind};

	/// A printer that answers every line with `reply`.
	fn printer_replying(reply: &'static str) -> Printer<Mock> {
		Printer::from_backend(Mock::with_responder(move |_| reply.as_bytes().to_vec()))
	}

	fn texts(lines: &[ResponseLine]) -> Vec<&str> {
		lines.iter().map(ResponseLine::text).collect()
	}

	#[test]
	fn command_reads_until_ack() {
		let mut printer = printer_replying("T:21.0 /0.0\nok\n");
		let transcript = printer.command("  M105 ", Duration::from_secs(1)).unwrap();
		assert!(transcript.terminated());
		assert_eq!(texts(transcript.lines()), ["T:21.0 /0.0", "ok"]);
		assert_eq!(transcript.lines()[0].kind(), LineKind::Info);
		assert_eq!(printer.backend().written(), b"M105\n");
	}

	#[test]
	fn send_block_sends_lines_in_order() {
		let mut printer = printer_replying("ok\n");
		let responses = printer
			.send_block("G28\n\n   \nG1 X10 Y10 F3000\n", Duration::from_secs(1))
			.unwrap();
		assert_eq!(texts(&responses), ["ok", "ok"]);
		assert_eq!(printer.backend().written(), b"G28\nG1 X10 Y10 F3000\n");
	}

	#[test]
	fn error_line_ends_command() {
		let mut printer = printer_replying("Error:Unknown command: \"G999\"\nok\n");
		let transcript = printer.command("G999", Duration::from_secs(1)).unwrap();
		assert!(transcript.terminated());
		assert_eq!(transcript.lines().len(), 1);
		assert_eq!(transcript.lines()[0].kind(), LineKind::Error);
	}

	#[test]
	fn terminal_prefix_ignores_case() {
		let mut printer = printer_replying("OK\n");
		let transcript = printer.command("G90", Duration::from_secs(1)).unwrap();
		assert!(transcript.terminated());
		assert_eq!(transcript.terminal().map(ResponseLine::text), Some("OK"));
	}

	#[test]
	fn silent_printer_is_not_an_error() {
		let mut printer = Printer::open_mock();
		let timeout = Duration::from_millis(200);
		let start = Instant::now();
		let transcript = printer.command("G28", timeout).unwrap();
		let elapsed = start.elapsed();
		assert!(!transcript.terminated());
		assert!(transcript.lines().is_empty());
		assert!(elapsed >= timeout);
		assert!(elapsed < Duration::from_secs(2));
	}

	#[test]
	fn silent_printer_motion_wait_ends_on_time() {
		let mut printer = Printer::open_mock();
		let timeout = Duration::from_millis(200);
		let start = Instant::now();
		let transcript = printer.wait_for_motion_complete(timeout).unwrap();
		let elapsed = start.elapsed();
		assert!(!transcript.terminated());
		assert!(elapsed >= timeout);
		assert!(elapsed < timeout + Duration::from_millis(100));
		assert_eq!(printer.backend().written(), b"M400\n");
	}

	#[test]
	fn unbounded_timeout_reads_until_ack() {
		let mut printer = printer_replying("echo:busy\nok\n");
		let responses = printer.send_block("G28", Duration::MAX).unwrap();
		assert_eq!(texts(&responses), ["echo:busy", "ok"]);
	}

	#[test]
	fn timed_out_line_does_not_stop_block() {
		let mut calls = 0;
		let mut printer = Printer::from_backend(Mock::with_responder(move |_| {
			calls += 1;
			if calls == 1 {
				b"echo:busy: processing\n".to_vec()
			} else {
				b"ok\n".to_vec()
			}
		}));
		let responses = printer
			.send_block("G28\nM114\n", Duration::from_millis(100))
			.unwrap();
		assert_eq!(texts(&responses), ["echo:busy: processing", "ok"]);
		assert_eq!(printer.backend().written(), b"G28\nM114\n");
	}

	#[test]
	fn startup_chatter_is_discarded() {
		let mut printer = printer_replying("ok\n");
		printer.backend_mut().push("start\necho: External Reset\n");
		let transcript = printer.command("M115", Duration::from_secs(1)).unwrap();
		assert_eq!(texts(transcript.lines()), ["ok"]);
	}

	#[test]
	fn empty_lines_are_ignored() {
		let mut printer = printer_replying("\r\n   \n\nok\r\n");
		let transcript = printer.command("G90", Duration::from_secs(1)).unwrap();
		assert_eq!(texts(transcript.lines()), ["ok"]);
	}

	#[test]
	fn fragment_is_completed_by_later_read() {
		let mut printer = Printer::from_backend(Mock::with_responder(|_| b"o".to_vec()));
		printer.discard_input().unwrap();
		let first = printer.command("G91", Duration::from_millis(100)).unwrap();
		assert!(!first.terminated());

		printer.backend_mut().push("k\n");
		let second = printer
			.wait_for_motion_complete(Duration::from_secs(1))
			.unwrap();
		assert!(second.terminated());
		assert_eq!(texts(second.lines()), ["ok"]);
	}

	#[test]
	fn invalid_utf8_is_replaced() {
		let mut printer = Printer::from_backend(Mock::with_responder(|_| b"T:\xff\nok\n".to_vec()));
		let transcript = printer.command("M105", Duration::from_secs(1)).unwrap();
		assert_eq!(texts(transcript.lines()), ["T:\u{fffd}", "ok"]);
	}

	#[test]
	fn motion_barrier_is_sent() {
		let mut printer = printer_replying("ok\n");
		let transcript = printer
			.wait_for_motion_complete(Duration::from_secs(1))
			.unwrap();
		assert!(transcript.terminated());
		assert_eq!(printer.backend().written(), b"M400\n");
	}

	#[test]
	fn blank_command_is_not_sent() {
		let mut printer = printer_replying("ok\n");
		let transcript = printer.command(" \t ", Duration::from_secs(1)).unwrap();
		assert_eq!(transcript, Transcript::default());
		assert!(printer.backend().written().is_empty());
	}

	#[test]
	fn write_error_is_reported() {
		let mut printer = printer_replying("ok\n");
		printer
			.backend_mut()
			.write_error(Some(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged")));
		let err = printer.command("G28", Duration::from_secs(1)).unwrap_err();
		assert!(matches!(err, GcodeError::Io(ref e) if e.kind() == io::ErrorKind::BrokenPipe));
	}

	#[test]
	fn read_timeout_is_restored() {
		let mut printer = printer_replying("ok\n");
		let before = printer.backend().read_timeout().unwrap();
		printer.command("G28", Duration::from_secs(1)).unwrap();
		assert_eq!(printer.backend().read_timeout().unwrap(), before);
	}

	#[test]
	fn failed_timeout_restore_poisons_printer() {
		let mut printer = printer_replying("ok\n");
		{
			let mut guard = printer.timeout_guard(Some(Duration::from_secs(1))).unwrap();
			guard
				.backend_mut()
				.set_read_timeout_error(Some(io::Error::other("oops")));
		}
		assert!(printer.command("G28", Duration::from_secs(1)).is_err());
		assert!(printer.command("G28", Duration::from_secs(1)).is_ok());
	}

	#[test]
	fn open_missing_device_fails() {
		let err = OpenSerialOptions::new()
			.baud_rate(250_000)
			.open("/dev/pipette-no-such-printer")
			.unwrap_err();
		let err = match err {
			GcodeError::Connection(err) => err,
			other => panic!("unexpected error: {other}"),
		};
		assert_eq!(err.stage(), ConnectionStage::Open);
		assert_eq!(err.baud_rate(), 250_000);
		assert_eq!(err.path(), "/dev/pipette-no-such-printer");
	}
}

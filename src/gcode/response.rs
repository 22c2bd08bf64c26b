//! Lines received from the printer.

/// The kind of a line received from the printer.
///
/// Only the start of the line matters, and case is ignored.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum LineKind {
	/// An acknowledgement, starting with `ok`. Ends the current command.
	Ack,
	/// An error, starting with `error`. Ends the current command.
	Error,
	/// Anything else, such as temperature reports or echoes. Recorded but
	/// does not end the current command.
	Info,
}

impl LineKind {
	/// Classify a line that has already had surrounding whitespace removed.
	///
	/// ```
	/// # use pipette::gcode::LineKind;
	/// assert_eq!(LineKind::classify("ok T:21.3 /0.0"), LineKind::Ack);
	/// assert_eq!(LineKind::classify("Error:Printer halted"), LineKind::Error);
	/// assert_eq!(LineKind::classify("echo:busy: processing"), LineKind::Info);
	/// ```
	pub fn classify(line: &str) -> Self {
		if starts_with_ignore_case(line, "ok") {
			LineKind::Ack
		} else if starts_with_ignore_case(line, "error") {
			LineKind::Error
		} else {
			LineKind::Info
		}
	}

	/// Whether a line of this kind ends the current command.
	pub fn is_terminal(self) -> bool {
		matches!(self, LineKind::Ack | LineKind::Error)
	}
}

fn starts_with_ignore_case(line: &str, prefix: &str) -> bool {
	line.as_bytes()
		.get(..prefix.len())
		.is_some_and(|start| start.eq_ignore_ascii_case(prefix.as_bytes()))
}

/// A non-empty line received from the printer, without surrounding whitespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResponseLine {
	text: String,
	kind: LineKind,
}

impl ResponseLine {
	/// Create a line from `text`, classifying it.
	pub fn new<S: Into<String>>(text: S) -> Self {
		let text = text.into();
		let kind = LineKind::classify(&text);
		ResponseLine { text, kind }
	}

	/// The text of the line.
	pub fn text(&self) -> &str {
		&self.text
	}

	/// The kind of line.
	pub fn kind(&self) -> LineKind {
		self.kind
	}

	/// Whether the line ends the current command.
	pub fn is_terminal(&self) -> bool {
		self.kind.is_terminal()
	}

	/// Get the text of the line, consuming it.
	pub fn into_text(self) -> String {
		self.text
	}
}

impl AsRef<str> for ResponseLine {
	fn as_ref(&self) -> &str {
		&self.text
	}
}

impl std::fmt::Display for ResponseLine {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(&self.text)
	}
}

/// Everything received in response to one command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
	lines: Vec<ResponseLine>,
	terminated: bool,
}

impl Transcript {
	/// Record a received line, noting whether it ended the command.
	pub(crate) fn push(&mut self, line: ResponseLine) {
		self.terminated = line.is_terminal();
		self.lines.push(line);
	}

	/// The lines received, in order.
	pub fn lines(&self) -> &[ResponseLine] {
		&self.lines
	}

	/// Whether an `ok` or `error` line arrived before the deadline.
	///
	/// A command that was not acknowledged in time is not an error; this is
	/// how it is reported.
	pub fn terminated(&self) -> bool {
		self.terminated
	}

	/// The line that ended the command, if any.
	pub fn terminal(&self) -> Option<&ResponseLine> {
		self.lines.last().filter(|_| self.terminated)
	}

	/// Get the received lines, consuming the transcript.
	pub fn into_lines(self) -> Vec<ResponseLine> {
		self.lines
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn classification_ignores_case() {
		assert_eq!(LineKind::classify("ok"), LineKind::Ack);
		assert_eq!(LineKind::classify("OK"), LineKind::Ack);
		assert_eq!(LineKind::classify("Ok P15 B3"), LineKind::Ack);
		assert_eq!(
			LineKind::classify("ERROR: checksum mismatch"),
			LineKind::Error
		);
		assert_eq!(LineKind::classify("error"), LineKind::Error);
		assert_eq!(LineKind::classify("o"), LineKind::Info);
		assert_eq!(LineKind::classify("err"), LineKind::Info);
		assert_eq!(LineKind::classify("T:210.0 /210.0"), LineKind::Info);
		assert_eq!(LineKind::classify(" ok"), LineKind::Info);
		assert_eq!(LineKind::classify("öko"), LineKind::Info);
	}

	#[test]
	fn transcript_terminal_line() {
		let mut transcript = Transcript::default();
		assert!(!transcript.terminated());
		transcript.push(ResponseLine::new("echo:busy"));
		assert!(!transcript.terminated());
		assert_eq!(transcript.terminal(), None);
		transcript.push(ResponseLine::new("ok"));
		assert!(transcript.terminated());
		assert_eq!(transcript.terminal().map(ResponseLine::text), Some("ok"));
		assert_eq!(transcript.lines().len(), 2);
	}
}

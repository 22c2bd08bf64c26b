//! Dynamixel Protocol 2.0 packet framing.
//!
//! Every packet has the form
//!
//! ```text
//! FF FF FD 00 | id | len_l len_h | instruction | params... | crc_l crc_h
//! ```
//!
//! where `len` counts the (stuffed) instruction and parameters plus the two
//! CRC bytes. Status packets use the [`STATUS`](instruction::STATUS)
//! instruction and carry the device error byte as their first parameter.

/// The four bytes that start every packet.
pub const HEADER: [u8; 4] = [0xFF, 0xFF, 0xFD, 0x00];

/// The byte sequence that must never appear unescaped after the header.
const STUFF_PATTERN: [u8; 3] = [0xFF, 0xFF, 0xFD];
/// The byte inserted after every [`STUFF_PATTERN`].
const STUFF_BYTE: u8 = 0xFD;

/// The number of bytes before the instruction: header, id and length.
pub const PREFIX_LEN: usize = HEADER.len() + 3;

/// The smallest possible `len` field: instruction and CRC.
const MIN_LEN_FIELD: usize = 3;

pub mod instruction {
	//! Instruction codes.

	/// Check that a device is present.
	pub const PING: u8 = 0x01;
	/// Read a block of the control table.
	pub const READ: u8 = 0x02;
	/// Write a block of the control table.
	pub const WRITE: u8 = 0x03;
	/// The instruction code of every status packet.
	pub const STATUS: u8 = 0x55;
}

/// A decoded packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
	/// The device id.
	pub id: u8,
	/// The instruction code.
	pub instruction: u8,
	/// The parameters, with byte stuffing removed.
	pub params: Vec<u8>,
}

/// The reason a frame could not be encoded or decoded.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FrameError {
	/// The frame does not start with [`HEADER`].
	Header,
	/// The frame is shorter or longer than its length field says.
	Length,
	/// The frame's CRC does not match its contents.
	Crc {
		/// The CRC carried by the frame.
		received: u16,
		/// The CRC computed over the frame.
		computed: u16,
	},
	/// The parameters do not fit in a single packet.
	TooLong,
}

impl std::error::Error for FrameError {}

impl std::fmt::Display for FrameError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			FrameError::Header => f.write_str("missing packet header"),
			FrameError::Length => f.write_str("frame length does not match its length field"),
			FrameError::Crc { received, computed } => write!(
				f,
				"CRC mismatch: received 0x{received:04X}, computed 0x{computed:04X}"
			),
			FrameError::TooLong => f.write_str("parameters do not fit in one packet"),
		}
	}
}

/// Compute the Protocol 2.0 CRC-16 of `data`.
///
/// The polynomial is `0x8005`, the initial value is zero, and neither the
/// input nor the output is reflected.
///
/// ```
/// # use pipette::servo::packet::crc16;
/// assert_eq!(crc16(b"123456789"), 0xFEE8);
/// ```
pub fn crc16(data: &[u8]) -> u16 {
	const POLY: u16 = 0x8005;
	let mut crc = 0u16;
	for &byte in data {
		crc ^= u16::from(byte) << 8;
		for _ in 0..8 {
			crc = if crc & 0x8000 != 0 {
				(crc << 1) ^ POLY
			} else {
				crc << 1
			};
		}
	}
	crc
}

/// Insert a stuffing byte after every `FF FF FD` in `body`.
pub fn stuff(body: &[u8]) -> Vec<u8> {
	let mut out = Vec::with_capacity(body.len() + body.len() / STUFF_PATTERN.len());
	for &byte in body {
		out.push(byte);
		if out.ends_with(&STUFF_PATTERN) {
			out.push(STUFF_BYTE);
		}
	}
	out
}

/// Remove the stuffing bytes inserted by [`stuff`].
pub fn unstuff(body: &[u8]) -> Vec<u8> {
	let mut out = Vec::with_capacity(body.len());
	let mut after_pattern = false;
	for &byte in body {
		if after_pattern && byte == STUFF_BYTE {
			after_pattern = false;
			continue;
		}
		out.push(byte);
		after_pattern = out.ends_with(&STUFF_PATTERN);
	}
	out
}

/// Build a complete packet for `id`.
///
/// ```
/// # use pipette::servo::packet::{encode, instruction};
/// let ping = encode(1, instruction::PING, &[]).unwrap();
/// assert_eq!(ping, [0xFF, 0xFF, 0xFD, 0x00, 0x01, 0x03, 0x00, 0x01, 0x19, 0x4E]);
/// ```
pub fn encode(id: u8, instruction: u8, params: &[u8]) -> Result<Vec<u8>, FrameError> {
	let mut body = Vec::with_capacity(params.len() + 1);
	body.push(instruction);
	body.extend_from_slice(params);
	let body = stuff(&body);
	let len = u16::try_from(body.len() + 2).map_err(|_| FrameError::TooLong)?;

	let mut frame = Vec::with_capacity(PREFIX_LEN + body.len() + 2);
	frame.extend_from_slice(&HEADER);
	frame.push(id);
	frame.extend_from_slice(&len.to_le_bytes());
	frame.extend_from_slice(&body);
	let crc = crc16(&frame);
	frame.extend_from_slice(&crc.to_le_bytes());
	Ok(frame)
}

/// Get the total frame length announced by the first [`PREFIX_LEN`] bytes of
/// a frame.
pub fn frame_len(prefix: &[u8; PREFIX_LEN]) -> Result<usize, FrameError> {
	if prefix[..HEADER.len()] != HEADER {
		return Err(FrameError::Header);
	}
	let len = usize::from(u16::from_le_bytes([prefix[5], prefix[6]]));
	if len < MIN_LEN_FIELD {
		return Err(FrameError::Length);
	}
	Ok(PREFIX_LEN + len)
}

/// Decode a complete frame, from the header to the CRC.
pub fn decode(frame: &[u8]) -> Result<Packet, FrameError> {
	let prefix: &[u8; PREFIX_LEN] = frame
		.get(..PREFIX_LEN)
		.and_then(|prefix| prefix.try_into().ok())
		.ok_or(FrameError::Length)?;
	if frame_len(prefix)? != frame.len() {
		return Err(FrameError::Length);
	}

	let (covered, crc) = frame.split_at(frame.len() - 2);
	let received = u16::from_le_bytes([crc[0], crc[1]]);
	let computed = crc16(covered);
	if received != computed {
		return Err(FrameError::Crc { received, computed });
	}

	let body = unstuff(&covered[PREFIX_LEN..]);
	let (&instruction, params) = body.split_first().ok_or(FrameError::Length)?;
	Ok(Packet {
		id: frame[4],
		instruction,
		params: params.to_vec(),
	})
}

/// The parameters of a [`READ`](instruction::READ) of `length` bytes at `address`.
pub fn read_params(address: u16, length: u16) -> [u8; 4] {
	let [a0, a1] = address.to_le_bytes();
	let [l0, l1] = length.to_le_bytes();
	[a0, a1, l0, l1]
}

/// The parameters of a [`WRITE`](instruction::WRITE) of `data` at `address`.
pub fn write_params(address: u16, data: &[u8]) -> Vec<u8> {
	let mut params = Vec::with_capacity(2 + data.len());
	params.extend_from_slice(&address.to_le_bytes());
	params.extend_from_slice(data);
	params
}

#[cfg(test)]
mod test {
	use super::*;

	const READ_PRESENT_POSITION: [u8; 14] = [
		0xFF, 0xFF, 0xFD, 0x00, 0x01, 0x07, 0x00, 0x02, 0x84, 0x00, 0x04, 0x00, 0x1D, 0x15,
	];
	const STATUS_166: [u8; 15] = [
		0xFF, 0xFF, 0xFD, 0x00, 0x01, 0x08, 0x00, 0x55, 0x00, 0xA6, 0x00, 0x00, 0x00, 0x8C, 0xC0,
	];

	#[test]
	fn crc_check_value() {
		assert_eq!(crc16(b"123456789"), 0xFEE8);
		assert_eq!(crc16(&[]), 0);
	}

	#[test]
	fn encode_read() {
		let frame = encode(1, instruction::READ, &read_params(132, 4)).unwrap();
		assert_eq!(frame, READ_PRESENT_POSITION);
	}

	#[test]
	fn decode_status() {
		let packet = decode(&STATUS_166).unwrap();
		assert_eq!(packet.id, 1);
		assert_eq!(packet.instruction, instruction::STATUS);
		assert_eq!(packet.params, [0x00, 0xA6, 0x00, 0x00, 0x00]);
	}

	#[test]
	fn decode_rejects_bad_frames() {
		let mut corrupt = STATUS_166;
		corrupt[9] = 0xA7;
		assert!(matches!(decode(&corrupt), Err(FrameError::Crc { received: 0xC08C, .. })));

		let mut headless = STATUS_166;
		headless[2] = 0xFE;
		assert_eq!(decode(&headless), Err(FrameError::Header));

		assert_eq!(decode(&STATUS_166[..10]), Err(FrameError::Length));
		assert_eq!(decode(&STATUS_166[..4]), Err(FrameError::Length));
	}

	#[test]
	fn stuffing_is_applied_and_removed() {
		let data = [0xFF, 0xFF, 0xFD, 0x01];
		let params = write_params(116, &data);
		let frame = encode(2, instruction::WRITE, &params).unwrap();

		// instruction + address + stuffed data + CRC
		let expected_len = 1 + 2 + data.len() + 1 + 2;
		assert_eq!(frame_len(frame[..PREFIX_LEN].try_into().unwrap()), Ok(frame.len()));
		assert_eq!(frame.len(), PREFIX_LEN + expected_len);
		assert_eq!(&frame[10..15], &[0xFF, 0xFF, 0xFD, 0xFD, 0x01]);

		let packet = decode(&frame).unwrap();
		assert_eq!(packet.id, 2);
		assert_eq!(packet.instruction, instruction::WRITE);
		assert_eq!(packet.params, params);
	}

	#[test]
	fn unstuff_leaves_plain_data_alone() {
		let body = [0x55, 0x00, 0xFD, 0xFD, 0xFF, 0xFD];
		assert_eq!(stuff(&body), body);
		assert_eq!(unstuff(&body), body);
	}
}

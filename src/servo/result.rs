//! The outcome of a single register transaction.

use crate::error::{servo_code, TransactionError};
use crate::servo::register::Register;

/// Whether a register exchange reached the device and came back intact.
///
/// The numeric [`code`](CommStatus::code)s are the ones used by the
/// Dynamixel SDK.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CommStatus {
	/// The exchange completed.
	Success,
	/// The bus could not be prepared for the exchange.
	PortBusy,
	/// The instruction packet could not be written.
	TxFail,
	/// The status packet could not be read.
	RxFail,
	/// The instruction packet could not be built.
	TxError,
	/// No status packet arrived in time.
	RxTimeout,
	/// A status packet arrived but was malformed or unexpected.
	RxCorrupt,
}

impl CommStatus {
	/// The SDK's numeric code for this status.
	pub const fn code(self) -> i32 {
		match self {
			CommStatus::Success => 0,
			CommStatus::PortBusy => -1000,
			CommStatus::TxFail => -1001,
			CommStatus::RxFail => -1002,
			CommStatus::TxError => -2000,
			CommStatus::RxTimeout => -3001,
			CommStatus::RxCorrupt => -3002,
		}
	}

	/// Look up a status by its SDK code.
	pub const fn from_code(code: i32) -> Option<Self> {
		Some(match code {
			0 => CommStatus::Success,
			-1000 => CommStatus::PortBusy,
			-1001 => CommStatus::TxFail,
			-1002 => CommStatus::RxFail,
			-2000 => CommStatus::TxError,
			-3001 => CommStatus::RxTimeout,
			-3002 => CommStatus::RxCorrupt,
			_ => return None,
		})
	}

	/// Whether the exchange completed.
	pub const fn is_success(self) -> bool {
		matches!(self, CommStatus::Success)
	}
}

impl std::fmt::Display for CommStatus {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(match self {
			CommStatus::Success => "success",
			CommStatus::PortBusy => "port is in use",
			CommStatus::TxFail => "failed to transmit instruction packet",
			CommStatus::RxFail => "failed to receive status packet",
			CommStatus::TxError => "incorrect instruction packet",
			CommStatus::RxTimeout => "no status packet received",
			CommStatus::RxCorrupt => "incorrect status packet",
		})
	}
}

/// The error byte of a status packet.
///
/// Bits 0 to 6 hold an error number (see
/// [`servo_code`](crate::error::servo_code)) and bit 7 is set when the device
/// has a hardware alert.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct DeviceError(u8);

impl DeviceError {
	/// No error was reported.
	pub const NONE: DeviceError = DeviceError(0);

	const ALERT_BIT: u8 = 0x80;

	/// Wrap a raw error byte.
	pub const fn from_raw(raw: u8) -> Self {
		DeviceError(raw)
	}

	/// The raw error byte.
	pub const fn raw(self) -> u8 {
		self.0
	}

	/// Whether the byte is zero.
	pub const fn is_none(self) -> bool {
		self.0 == 0
	}

	/// Whether the hardware alert bit is set.
	pub const fn alert(self) -> bool {
		self.0 & DeviceError::ALERT_BIT != 0
	}

	/// The error number, without the alert bit.
	pub const fn code(self) -> u8 {
		self.0 & !DeviceError::ALERT_BIT
	}
}

impl std::fmt::Display for DeviceError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match (self.code(), servo_code::name(self.code())) {
			(0, _) => f.write_str("no error")?,
			(_, Some(name)) => f.write_str(name)?,
			(code, None) => write!(f, "unknown error {code}")?,
		}
		if self.alert() {
			f.write_str(" (hardware alert)")?;
		}
		Ok(())
	}
}

/// The direction of a register transaction.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Access {
	/// A register read.
	Read,
	/// A register write.
	Write,
}

impl std::fmt::Display for Access {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Access::Read => f.write_str("read"),
			Access::Write => f.write_str("write"),
		}
	}
}

/// The normalized outcome of one register read or write.
///
/// Transport failures are recorded in [`status`](TransactionResult::status)
/// rather than returned as errors, so best-effort callers can ignore them.
/// Use [`require`](TransactionResult::require) to treat them as errors.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TransactionResult {
	id: u8,
	access: Access,
	register: Register,
	status: CommStatus,
	device_error: DeviceError,
	value: Option<u32>,
}

impl TransactionResult {
	pub(crate) const fn new(
		id: u8,
		access: Access,
		register: Register,
		status: CommStatus,
		device_error: DeviceError,
		value: Option<u32>,
	) -> Self {
		TransactionResult {
			id,
			access,
			register,
			status,
			device_error,
			value,
		}
	}

	/// A result for an exchange that failed before a status packet was parsed.
	pub(crate) const fn failed(
		id: u8,
		access: Access,
		register: Register,
		status: CommStatus,
	) -> Self {
		TransactionResult::new(id, access, register, status, DeviceError::NONE, None)
	}

	/// The id the transaction was addressed to.
	pub fn id(&self) -> u8 {
		self.id
	}

	/// Whether this was a read or a write.
	pub fn access(&self) -> Access {
		self.access
	}

	/// The register that was accessed.
	pub fn register(&self) -> Register {
		self.register
	}

	/// The communication status.
	pub fn status(&self) -> CommStatus {
		self.status
	}

	/// The error reported by the device. Always [`DeviceError::NONE`] unless
	/// a status packet was received.
	pub fn device_error(&self) -> DeviceError {
		self.device_error
	}

	/// The value read, or observed after a write.
	pub fn value(&self) -> Option<u32> {
		self.value
	}

	/// The value reinterpreted as a signed 32-bit number.
	pub fn value_i32(&self) -> Option<i32> {
		self.value
			.map(|value| i32::from_le_bytes(value.to_le_bytes()))
	}

	/// Whether the exchange completed.
	pub fn is_success(&self) -> bool {
		self.status.is_success()
	}

	/// Return the result if the exchange completed, or a [`TransactionError`]
	/// describing why it did not.
	///
	/// A non-zero [`DeviceError`] does not make this fail.
	pub fn require(self) -> Result<Self, TransactionError> {
		if self.status.is_success() {
			Ok(self)
		} else {
			Err(TransactionError::new(
				self.id,
				self.access,
				self.register.address(),
				self.status,
				self.device_error,
			))
		}
	}

	/// Accept the outcome of a write whose failure is tolerated.
	///
	/// A failed exchange or a device error is logged and otherwise ignored.
	/// Returns whether the exchange completed.
	pub fn attempt_best_effort(self) -> bool {
		match self.require() {
			Ok(result) => {
				if !result.device_error.is_none() {
					log::debug!(
						"ignoring device error on best-effort {} of address {} on id {}: {}",
						result.access,
						result.register.address(),
						result.id,
						result.device_error
					);
				}
				true
			}
			Err(err) => {
				log::debug!("ignoring best-effort failure: {err}");
				false
			}
		}
	}
}

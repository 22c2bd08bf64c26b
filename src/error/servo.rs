//! Error types for the Dynamixel register bus.

use super::ConnectionError;
use crate::servo::{register, Access, CommStatus, DeviceError};

/// A required register transaction did not complete.
///
/// Only the communication status decides this. A transaction that completed
/// with a non-zero [`DeviceError`] is not a `TransactionError`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(all(doc, feature = "doc_cfg"), doc(cfg(feature = "servo")))]
pub struct TransactionError {
	id: u8,
	access: Access,
	address: u16,
	status: CommStatus,
	device_error: DeviceError,
}

impl_error_display! {
	TransactionError,
	self => "{} of {} on id {} failed: {} (comm={}, err={})",
	self.access,
	RegisterLabel(self.address),
	self.id,
	self.status,
	self.status.code(),
	self.device_error.raw()
}

impl TransactionError {
	/// Create a new error.
	pub(crate) const fn new(
		id: u8,
		access: Access,
		address: u16,
		status: CommStatus,
		device_error: DeviceError,
	) -> Self {
		TransactionError {
			id,
			access,
			address,
			status,
			device_error,
		}
	}

	/// The id of the servo the transaction was addressed to.
	pub fn id(&self) -> u8 {
		self.id
	}

	/// Whether the register was being read or written.
	pub fn access(&self) -> Access {
		self.access
	}

	/// The control table address of the register.
	pub fn address(&self) -> u16 {
		self.address
	}

	/// The communication status that caused the failure.
	pub fn status(&self) -> CommStatus {
		self.status
	}

	/// The error reported by the device, if the status packet was received.
	pub fn device_error(&self) -> DeviceError {
		self.device_error
	}
}

/// Formats a control table address with its register name, when known.
struct RegisterLabel(u16);

impl std::fmt::Display for RegisterLabel {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match register::name(self.0) {
			Some(name) => write!(f, "{name} (address {})", self.0),
			None => write!(f, "address {}", self.0),
		}
	}
}

error_enum! {
	/// Any error returned by the [`servo`](crate::servo) module.
	#[derive(Debug)]
	#[non_exhaustive]
	#[cfg_attr(all(doc, feature = "doc_cfg"), doc(cfg(feature = "servo")))]
	pub enum ServoError {
		Connection(ConnectionError),
		Io(std::io::Error),
		Transaction(TransactionError),
	}
}
impl_is_timeout! { ServoError }

macro_rules! define_error_codes {
	// Entry point.
	//
	// Serves to concatenate the parts of the name before defining the constants.
	(
		$(
			$num:literal: $($name_word:ident)+
		),+
		$(,)?
	) => {
		paste::paste! {
			define_error_codes!{@with_concatenated_name
				$(
					$num: $($name_word)+, [< $($name_word:camel)+ >]
				),+
			}
		}
	};
	(@with_concatenated_name
		$(
			$num:literal: $($name_word:ident)+, $name:ident
		),+
	) => {
		paste::paste! {
			#[cfg_attr(all(doc, feature = "doc_cfg"), doc(cfg(feature = "servo")))]
			pub mod servo_code {
				//! Error numbers reported in the low seven bits of a status
				//! packet's error byte.
				//!
				//! The codes in numerical order are:
				#![doc =
				$( "* `" $num "`: [`" $name:snake:upper "`]\n\n" )+
				]

				$(
					#[doc = $(" " $name_word " ")+ "(code `" $num "`)." ]
					pub const [< $name:snake:upper >] : u8 = $num;
				)+

				/// Get the name of an error number.
				///
				/// If the number is not recognized, `None` is returned.
				pub const fn name(code: u8) -> Option<&'static str> {
					match code {
						$(
							$num => Some(stringify!($($name_word)+)),
						)+
						_ => None,
					}
				}
			}
		}
	};
}

define_error_codes! {
	1: Result Fail,
	2: Instruction Error,
	3: Crc Error,
	4: Data Range Error,
	5: Data Length Error,
	6: Data Limit Error,
	7: Access Error,
}

#[cfg(test)]
mod test {
	use super::servo_code::*;
	use super::*;
	use static_assertions::{assert_impl_all, const_assert};

	const _WORD_SIZE: usize = std::mem::size_of::<&usize>();
	const_assert!(std::mem::size_of::<ServoError>() <= 3 * _WORD_SIZE);

	assert_impl_all!(ServoError: From<TransactionError>, From<ConnectionError>);
	assert_impl_all!(TransactionError: TryFrom<ServoError>, Copy, Send, Sync);

	#[test]
	fn servo_error_code_names() {
		assert_eq!(name(CRC_ERROR), Some("Crc Error"));
		assert_eq!(name(DATA_LIMIT_ERROR), Some("Data Limit Error"));
		assert_eq!(RESULT_FAIL, 1);
		assert_eq!(name(0), None);
		assert_eq!(name(42), None);
	}

	#[test]
	fn transaction_error_display() {
		let err = TransactionError::new(
			1,
			Access::Write,
			64,
			CommStatus::RxTimeout,
			DeviceError::NONE,
		);
		assert_eq!(
			err.to_string(),
			"write of torque enable (address 64) on id 1 failed: no status packet received (comm=-3001, err=0)"
		);

		let err = TransactionError::new(
			3,
			Access::Read,
			500,
			CommStatus::RxCorrupt,
			DeviceError::NONE,
		);
		assert!(err
			.to_string()
			.starts_with("read of address 500 on id 3 failed"));
	}
}

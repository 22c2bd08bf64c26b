//! Types for driving servos over a Dynamixel Protocol 2.0 bus.
//!
//! ## Communicating with a Servo
//!
//! All communication starts with a [`Bus`], which owns one open serial line
//! shared by every servo id on it:
//!
//! ```
//! # use pipette::servo::Bus;
//! # fn wrapper() -> Result<(), Box<dyn std::error::Error>> {
//! let mut bus = Bus::open_serial("/dev/ttyACM0")?;
//! # Ok(())
//! # }
//! ```
//!
//! Every exchange with a servo is a single register read or write. Each one
//! produces a [`TransactionResult`] whose [`CommStatus`] says whether the
//! exchange itself worked and whose [`DeviceError`] is whatever the servo
//! reported. Only a failed exchange is treated as a hard failure, and only
//! when the caller asks for it with [`TransactionResult::require`]:
//!
//! ```
//! # use pipette::{backend::Backend, servo::{Bus, register}};
//! # fn wrapper<B: Backend>(mut bus: Bus<B>) -> Result<(), Box<dyn std::error::Error>> {
//! let result = bus.read_register(1, register::PRESENT_POSITION).require()?;
//! println!("position: {:?}", result.value());
//! # Ok(())
//! # }
//! ```
//!
//! Higher level operations, like [`move_to`](Bus::move_to), combine several
//! transactions and decide which of them are required:
//!
//! ```
//! # use pipette::{backend::Backend, servo::{Bus, MotionRequest}};
//! # use std::time::Duration;
//! # fn wrapper<B: Backend>(mut bus: Bus<B>) -> Result<(), Box<dyn std::error::Error>> {
//! let outcome = bus.move_to(1, MotionRequest::new(2048).timeout(Duration::from_secs(2)))?;
//! if !outcome.converged {
//!     println!("stopped at {} ticks", outcome.position);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! The [`routine`] module contains longer sequences built on top of a `Bus`.

mod bus;
pub mod packet;
pub mod register;
mod result;
pub mod routine;
#[cfg(test)]
pub(crate) mod sim;

pub use bus::*;
pub use register::{OperatingMode, Register, Width};
pub use result::*;

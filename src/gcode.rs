//! Types for driving a printer with G-code over a serial line.
//!
//! ## Communicating with a Printer
//!
//! All communication starts with a [`Printer`]:
//!
//! ```
//! # use pipette::gcode::Printer;
//! # fn wrapper() -> Result<(), Box<dyn std::error::Error>> {
//! let mut printer = Printer::open_serial("/dev/ttyUSB0")?;
//! # Ok(())
//! # }
//! ```
//!
//! To customize the baud rate or timeout, use [`OpenSerialOptions`].
//!
//! Lines are sent one at a time. After each line the printer replies with any
//! number of informational lines followed by one line starting with `ok` or
//! `error`, which ends the command:
//!
//! ```
//! # use pipette::{backend::Backend, gcode::Printer};
//! # use std::time::Duration;
//! # fn wrapper<B: Backend>(mut printer: Printer<B>) -> Result<(), Box<dyn std::error::Error>> {
//! let responses = printer.send_block("G28\nG1 X10 F3000", Duration::from_secs(5))?;
//! let done = printer.wait_for_motion_complete(Duration::from_secs(30))?;
//! if !done.terminated() {
//!     println!("still moving");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! A printer that does not answer in time is not an error. The command is
//! abandoned and the returned [`Transcript`] says so.

mod options;
mod port;
mod response;

pub use options::*;
pub use port::*;
pub use response::*;

//! A small library for driving a G-code printer and a Dynamixel servo bus
//! over serial links.
//!
//! The [`gcode`] module speaks the printer's line protocol, the [`servo`]
//! module speaks Dynamixel Protocol 2.0, and [`lock`] keeps sessions on the
//! same physical bus from interleaving. The [`service`] module ties them
//! together behind one request/response surface.

#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]
#![deny(missing_debug_implementations)]
#![cfg_attr(all(doc, feature = "doc_cfg"), feature(doc_cfg))]

pub mod backend;
pub mod error;
#[cfg(feature = "gcode")]
#[cfg_attr(all(doc, feature = "doc_cfg"), doc(cfg(feature = "gcode")))]
pub mod gcode;
pub mod lock;
pub mod position;
#[cfg(feature = "servo")]
#[cfg_attr(all(doc, feature = "doc_cfg"), doc(cfg(feature = "servo")))]
pub mod servo;
#[cfg(all(feature = "gcode", feature = "servo"))]
#[cfg_attr(
	all(doc, feature = "doc_cfg"),
	doc(cfg(all(feature = "gcode", feature = "servo")))
)]
pub mod service;
pub mod timeout_guard;

#[cfg(not(any(feature = "gcode", feature = "servo")))]
compile_error!("At least one of the `gcode` or `servo` features must be specified");

#![allow(missing_docs)]

use pipette::gcode::Printer;
use simple_logger::SimpleLogger;
use std::time::Duration;

fn main() -> Result<(), Box<dyn std::error::Error>> {
	// Enable logging
	SimpleLogger::new().init().unwrap();

	// Open the printer, home it, and move the head.
	let mut printer = Printer::open_serial("/dev/ttyUSB0")?;
	let responses = printer.send_block("G28\nG90\nG1 X50 Y50 F3000", Duration::from_secs(5))?;
	for line in &responses {
		println!("{line}");
	}

	// Wait for the moves to finish before reporting the position.
	let done = printer.wait_for_motion_complete(Duration::from_secs(60))?;
	if !done.terminated() {
		println!("the printer is still moving");
	}
	let position = printer.command("M114", Duration::from_secs(5))?;
	for line in position.lines() {
		println!("{line}");
	}
	Ok(())
}

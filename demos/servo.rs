#![allow(missing_docs)]

use pipette::{
	position::ticks_to_degrees,
	servo::{routine, Bus, MotionRequest},
};
use simple_logger::SimpleLogger;
use std::time::Duration;

fn main() -> Result<(), Box<dyn std::error::Error>> {
	// Enable logging
	SimpleLogger::new().init().unwrap();

	let id = 1;
	let mut bus = Bus::open_serial("/dev/ttyACM0")?;

	let start = bus.read_position(id)?;
	println!("{start} ticks ({:.1}°)", ticks_to_degrees(i64::from(start)));

	// Move gently a quarter turn and back. Torque is disabled at the end of the
	// block, even if a move fails.
	{
		let mut bus = bus.torque_guard(id);
		let outcome = bus.move_to(
			id,
			MotionRequest::new(start + 1024)
				.velocity(20)
				.acceleration(5)
				.timeout(Duration::from_secs(10)),
		)?;
		println!("{outcome:?}");
		bus.move_to(id, MotionRequest::new(start).velocity(20).acceleration(5))?;
	}

	// Nudge every servo on the bus a little either side of where it is.
	let reports = routine::wiggle(&mut bus, &[1, 2, 3], &routine::WiggleOptions::new())?;
	for report in reports {
		println!("{report:?}");
	}

	let end = routine::read_position_released(&mut bus, id)?;
	println!("{end} ticks ({:.1}°), torque off", ticks_to_degrees(i64::from(end)));
	Ok(())
}

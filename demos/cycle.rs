#![allow(missing_docs)]

use pipette::servo::{
	routine::{cycle, CycleOptions},
	Bus,
};
use simple_logger::SimpleLogger;
use std::{
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
	time::Duration,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
	// Enable logging
	SimpleLogger::new().init().unwrap();

	let mut bus = Bus::open_serial("/dev/ttyACM0")?;

	// Stop from another thread after a while. An interrupt handler would set
	// the same flag.
	let stop = Arc::new(AtomicBool::new(false));
	{
		let stop = Arc::clone(&stop);
		std::thread::spawn(move || {
			std::thread::sleep(Duration::from_secs(30));
			stop.store(true, Ordering::Relaxed);
		});
	}

	let mut options = CycleOptions::new();
	options.positions(1192, 1131).dwell(Duration::from_secs(1));
	let moves = cycle(&mut bus, 1, &options, &stop)?;
	println!("{moves} moves, torque off");
	Ok(())
}

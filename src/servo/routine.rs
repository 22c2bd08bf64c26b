//! Longer sequences built from [`Bus`] operations.
//!
//! Each routine runs on a bus the caller has already opened, and leaves
//! torque disabled on every servo it enabled, however it exits.
//!
//! ```
//! # use pipette::{backend::Backend, servo::{Bus, routine::{self, CycleOptions}}};
//! # use std::sync::atomic::AtomicBool;
//! # fn wrapper<B: Backend>(mut bus: Bus<B>) -> Result<(), Box<dyn std::error::Error>> {
//! // Set `stop` from a Ctrl-C handler to end the cycle.
//! let stop = AtomicBool::new(false);
//! let moves = routine::cycle(&mut bus, 1, CycleOptions::new().cycles(Some(3)), &stop)?;
//! # Ok(())
//! # }
//! ```

use crate::{
	backend::Backend,
	error::ServoError,
	position,
	servo::{register, Bus, OperatingMode, POLL_INTERVAL},
};
use std::{
	sync::atomic::{AtomicBool, Ordering},
	time::{Duration, Instant},
};

/// Options for [`cycle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleOptions {
	position_a: i32,
	position_b: i32,
	dwell: Duration,
	velocity: Option<u32>,
	acceleration: Option<u32>,
	cycles: Option<u32>,
}

impl CycleOptions {
	/// Create the default options.
	///
	/// The servo alternates between 1192 and 1131 ticks, waiting one second
	/// at each, with a profile velocity of 20 and acceleration of 5, until
	/// stopped.
	pub fn new() -> Self {
		CycleOptions {
			position_a: 1192,
			position_b: 1131,
			dwell: Duration::from_secs(1),
			velocity: Some(20),
			acceleration: Some(5),
			cycles: None,
		}
	}

	/// Set the two goal positions, in ticks.
	pub fn positions(&mut self, a: i32, b: i32) -> &mut Self {
		self.position_a = a;
		self.position_b = b;
		self
	}

	/// Set how long to wait at each position.
	pub fn dwell(&mut self, dwell: Duration) -> &mut Self {
		self.dwell = dwell;
		self
	}

	/// Set the profile velocity, or leave it unchanged with `None`.
	pub fn velocity(&mut self, velocity: Option<u32>) -> &mut Self {
		self.velocity = velocity;
		self
	}

	/// Set the profile acceleration, or leave it unchanged with `None`.
	pub fn acceleration(&mut self, acceleration: Option<u32>) -> &mut Self {
		self.acceleration = acceleration;
		self
	}

	/// Stop after visiting both positions this many times. `None` cycles until
	/// stopped.
	pub fn cycles(&mut self, cycles: Option<u32>) -> &mut Self {
		self.cycles = cycles;
		self
	}
}

impl Default for CycleOptions {
	fn default() -> Self {
		CycleOptions::new()
	}
}

/// Alternate servo `id` between two positions until `stop` is set or the
/// configured number of cycles completes.
///
/// The profile is set on a best-effort basis, then torque is enabled (failing
/// to do so is an error). Goal writes that fail are logged and skipped. Torque
/// is disabled on every exit path.
///
/// On success, the number of goals written is returned.
pub fn cycle<B: Backend>(
	bus: &mut Bus<B>,
	id: u8,
	options: &CycleOptions,
	stop: &AtomicBool,
) -> Result<u32, ServoError> {
	bus.configure_profile(id, options.velocity, options.acceleration);
	let mut bus = bus.torque_guard(id);
	bus.set_torque(id, true)?;

	let goals = [options.position_a, options.position_b];
	let limit = options.cycles.map(|cycles| cycles.saturating_mul(2));
	let mut moves = 0u32;
	while !stop.load(Ordering::Relaxed) && !limit.is_some_and(|limit| moves >= limit) {
		let goal = goals[usize::from(moves % 2 == 1)];
		log::debug!("id {id}: moving to {goal}");
		bus.write_register(
			id,
			register::GOAL_POSITION,
			u32::from_le_bytes(goal.to_le_bytes()),
		)
		.attempt_best_effort();
		moves += 1;
		sleep_unless_stopped(options.dwell, stop);
	}
	log::debug!("id {id}: cycle ended after {moves} moves");
	Ok(moves)
}

/// Sleep for `duration`, waking early if `stop` is set.
///
/// A duration too long to represent as a deadline sleeps until `stop` is set.
fn sleep_unless_stopped(duration: Duration, stop: &AtomicBool) {
	let deadline = Instant::now().checked_add(duration);
	loop {
		if stop.load(Ordering::Relaxed) {
			return;
		}
		let pause = match deadline {
			Some(deadline) => {
				let now = Instant::now();
				if now >= deadline {
					return;
				}
				POLL_INTERVAL.min(deadline - now)
			}
			None => POLL_INTERVAL,
		};
		std::thread::sleep(pause);
	}
}

/// Options for [`wiggle`].
#[derive(Debug, Clone, PartialEq)]
pub struct WiggleOptions {
	delta_degrees: f64,
	velocity: Option<u32>,
	acceleration: Option<u32>,
	settle: Duration,
	force: bool,
}

impl WiggleOptions {
	/// Create the default options.
	///
	/// Each servo moves 10 degrees either side of its start, waiting 0.6
	/// seconds after each move, with a profile velocity of 20 and
	/// acceleration of 5. Servos not in position control are not moved.
	pub fn new() -> Self {
		WiggleOptions {
			delta_degrees: 10.0,
			velocity: Some(20),
			acceleration: Some(5),
			settle: Duration::from_millis(600),
			force: false,
		}
	}

	/// Set how far to move either side of the start position, in degrees.
	pub fn delta_degrees(&mut self, degrees: f64) -> &mut Self {
		self.delta_degrees = degrees;
		self
	}

	/// Set the profile velocity, or leave it unchanged with `None`.
	pub fn velocity(&mut self, velocity: Option<u32>) -> &mut Self {
		self.velocity = velocity;
		self
	}

	/// Set the profile acceleration, or leave it unchanged with `None`.
	pub fn acceleration(&mut self, acceleration: Option<u32>) -> &mut Self {
		self.acceleration = acceleration;
		self
	}

	/// Set how long to wait after each move.
	pub fn settle(&mut self, settle: Duration) -> &mut Self {
		self.settle = settle;
		self
	}

	/// Set whether to move servos that are not in position control.
	pub fn force(&mut self, force: bool) -> &mut Self {
		self.force = force;
		self
	}
}

impl Default for WiggleOptions {
	fn default() -> Self {
		WiggleOptions::new()
	}
}

/// What [`wiggle`] found and did for one servo.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct WiggleReport {
	/// The servo id.
	pub id: u8,
	/// The present position before moving, in ticks.
	pub start: i32,
	/// The operating mode, if it could be read.
	pub mode: Option<OperatingMode>,
	/// Whether the servo was moved.
	pub moved: bool,
}

/// Move each servo in `ids` a little either side of where it is, one at a
/// time, and back.
///
/// Every servo's position and operating mode are read first. Servos whose
/// position cannot be read are skipped and left out of the report. If any
/// servo is known to be in a mode other than position control, nothing moves
/// unless [`force`](WiggleOptions::force) is set.
///
/// Each servo then has torque disabled, its profile set (best effort), torque
/// enabled, and is sent to `start + delta`, `start - delta` and `start`
/// (wrapped to one revolution), waiting after each. Torque is disabled again
/// afterwards, including when enabling it fails.
pub fn wiggle<B: Backend>(
	bus: &mut Bus<B>,
	ids: &[u8],
	options: &WiggleOptions,
) -> Result<Vec<WiggleReport>, ServoError> {
	let mut reports = Vec::with_capacity(ids.len());
	for &id in ids {
		let start = match bus.read_position(id) {
			Ok(start) => start,
			Err(err) => {
				log::warn!("skipping id {id}: {err}");
				continue;
			}
		};
		let mode = bus.read_operating_mode(id).ok();
		log::debug!(
			"id {id}: present position {start} ({:.1} deg), mode {mode:?}",
			position::ticks_to_degrees(i64::from(start))
		);
		reports.push(WiggleReport {
			id,
			start,
			mode,
			moved: false,
		});
	}
	if reports.is_empty() {
		log::warn!("no positions read from ids {ids:?}; nothing to move");
		return Ok(reports);
	}

	let refused: Vec<u8> = reports
		.iter()
		.filter(|report| matches!(report.mode, Some(mode) if mode != OperatingMode::Position))
		.map(|report| report.id)
		.collect();
	if !refused.is_empty() && !options.force {
		log::warn!("ids not in position control: {refused:?}; not moving");
		return Ok(reports);
	}

	let delta = position::degrees_to_ticks(options.delta_degrees);
	for report in &mut reports {
		let id = report.id;
		bus.try_disable_torque(id);
		bus.configure_profile(id, options.velocity, options.acceleration);
		let mut bus = bus.torque_guard(id);
		bus.set_torque(id, true)?;

		let start = i64::from(report.start);
		for goal in [start + delta, start - delta, start] {
			// Wrapped goals are always within one revolution.
			let goal = u32::try_from(position::wrap_ticks(goal)).unwrap_or_default();
			bus.write_register(id, register::GOAL_POSITION, goal)
				.attempt_best_effort();
			std::thread::sleep(options.settle);
		}
		report.moved = true;
	}
	Ok(reports)
}

/// Disable torque on servo `id` (best effort) and read its position, leaving
/// it free to move by hand.
pub fn read_position_released<B: Backend>(bus: &mut Bus<B>, id: u8) -> Result<i32, ServoError> {
	bus.try_disable_torque(id);
	Ok(bus.read_position(id)?)
}

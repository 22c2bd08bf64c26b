//! Conversions between raw servo ticks and degrees.
//!
//! A revolution is [`TICKS_PER_REV`] ticks. Degrees reported to callers are
//! always the position within one revolution, so multi-turn positions and
//! negative positions wrap into `[0, 360)`.

/// The number of ticks in one revolution of the output shaft.
pub const TICKS_PER_REV: i64 = 4096;

/// The number of degrees in one revolution.
pub const DEGREES_PER_REV: f64 = 360.0;

/// Wrap `ticks` into `[0, TICKS_PER_REV)`.
///
/// Negative values wrap upwards, so `-1` becomes `4095`.
pub fn wrap_ticks(ticks: i64) -> i64 {
	ticks.rem_euclid(TICKS_PER_REV)
}

/// Convert a tick count to degrees in `[0, 360)`.
///
/// ```
/// # use pipette::position::ticks_to_degrees;
/// assert_eq!(ticks_to_degrees(1024), 90.0);
/// assert_eq!(ticks_to_degrees(4096), 0.0);
/// ```
#[allow(clippy::cast_precision_loss)]
pub fn ticks_to_degrees(ticks: i64) -> f64 {
	wrap_ticks(ticks) as f64 * (DEGREES_PER_REV / TICKS_PER_REV as f64)
}

/// Convert degrees to the nearest tick count.
///
/// Halfway values round to the even neighbour. No wrapping is applied; wrap
/// the result with [`wrap_ticks`] before writing it as a goal if needed.
///
/// ```
/// # use pipette::position::degrees_to_ticks;
/// assert_eq!(degrees_to_ticks(90.0), 1024);
/// assert_eq!(degrees_to_ticks(-10.0), -114);
/// ```
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub fn degrees_to_ticks(degrees: f64) -> i64 {
	(degrees / DEGREES_PER_REV * TICKS_PER_REV as f64).round_ties_even() as i64
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn ticks_to_degrees_sample_points() {
		assert_eq!(ticks_to_degrees(0), 0.0);
		assert_eq!(ticks_to_degrees(4096), 0.0);
		assert_eq!(ticks_to_degrees(1024), 90.0);
		assert_eq!(ticks_to_degrees(2048), 180.0);
		assert_eq!(ticks_to_degrees(-1024), 270.0);
		assert_eq!(ticks_to_degrees(4096 * 3 + 1024), 90.0);
	}

	#[test]
	fn degrees_to_ticks_sample_points() {
		assert_eq!(degrees_to_ticks(90.0), 1024);
		assert_eq!(degrees_to_ticks(0.0), 0);
		assert_eq!(degrees_to_ticks(360.0), 4096);
		assert_eq!(degrees_to_ticks(10.0), 114);
	}

	#[test]
	fn degrees_to_ticks_rounds_ties_to_even() {
		// 0.5 ticks and 1.5 ticks
		let half_tick = DEGREES_PER_REV / 4096.0 / 2.0;
		assert_eq!(degrees_to_ticks(half_tick), 0);
		assert_eq!(degrees_to_ticks(half_tick * 3.0), 2);
	}

	#[test]
	fn round_trip_stays_within_one_tick() {
		for t in 0..TICKS_PER_REV {
			let back = degrees_to_ticks(ticks_to_degrees(t));
			assert!((back - t).abs() <= 1, "{t} came back as {back}");
		}
	}

	#[test]
	fn wrap_ticks_handles_negatives() {
		assert_eq!(wrap_ticks(-1), 4095);
		assert_eq!(wrap_ticks(4096), 0);
		assert_eq!(wrap_ticks(1192 + 114), 1306);
	}
}

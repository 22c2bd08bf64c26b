//! A bus for exchanging Dynamixel Protocol 2.0 packets.

#[cfg(any(test, feature = "mock"))]
use crate::backend::Mock;
use crate::{
	backend::{Backend, Serial, UNKNOWN_BACKEND_NAME},
	error::{ServoError, TransactionError},
	servo::{
		packet::{self, instruction},
		register::{self, OperatingMode, Register},
		Access, CommStatus, DeviceError, TransactionResult,
	},
	timeout_guard::TimeoutGuard,
};
use std::{
	collections::BTreeMap,
	io,
	time::{Duration, Instant},
};

/// How long to wait between reads of the present position while waiting for
/// a move to converge.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// The most bytes skipped while looking for the start of a status packet.
const MAX_LEADING_NOISE: usize = 256;

/// The largest status packet accepted.
const MAX_FRAME_LEN: usize = 1024;

/// Options for configuring and opening a serial servo bus.
///
/// ## Example
///
/// ```rust
/// # use pipette::servo::OpenBusOptions;
/// # use std::time::Duration;
/// # fn wrapper() -> Result<(), Box<dyn std::error::Error>> {
/// let mut bus = OpenBusOptions::new()
///     .baud_rate(57_600)
///     .timeout(Some(Duration::from_millis(50)))
///     .open("/dev/ttyACM0")?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct OpenBusOptions {
	/// The custom baud rate
	baud_rate: u32,
	/// The custom timeout
	timeout: Option<Duration>,
}

impl OpenBusOptions {
	/// The default baud rate: 1,000,000.
	pub const DEFAULT_BAUD_RATE: u32 = 1_000_000;

	/// The default time to wait for a status packet: 100 milliseconds.
	pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(100);

	/// Create a blank set of options ready for configuration.
	///
	/// The default baud rate and read timeout are 1,000,000 and 100
	/// milliseconds, respectively.
	///
	/// Equivalent to [`default`](OpenBusOptions::default).
	pub fn new() -> Self {
		OpenBusOptions {
			baud_rate: OpenBusOptions::DEFAULT_BAUD_RATE,
			timeout: Some(OpenBusOptions::DEFAULT_TIMEOUT),
		}
	}

	/// Set a custom baud rate.
	pub fn baud_rate(&mut self, baud_rate: u32) -> &mut Self {
		self.baud_rate = baud_rate;
		self
	}

	/// Set a custom read timeout.
	///
	/// If duration is `None`, reads will block indefinitely.
	pub fn timeout(&mut self, duration: Option<Duration>) -> &mut Self {
		self.timeout = duration;
		self
	}

	/// Open the bus at the specified path with the custom options.
	///
	/// A device that cannot be opened or configured is reported as
	/// [`ServoError::Connection`].
	pub fn open(&self, path: &str) -> Result<Bus<Serial>, ServoError> {
		Ok(Bus::from_backend(Serial::open(
			path,
			self.baud_rate,
			self.timeout,
		)?))
	}
}

impl Default for OpenBusOptions {
	fn default() -> Self {
		OpenBusOptions::new()
	}
}

/// A request to move one servo to a goal position.
///
/// ## Example
///
/// ```rust
/// # use pipette::servo::MotionRequest;
/// # use std::time::Duration;
/// let mut request = MotionRequest::new(2048);
/// request
///     .velocity(20)
///     .acceleration(5)
///     .tolerance(4)
///     .timeout(Duration::from_secs(3));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MotionRequest {
	goal: i32,
	velocity: Option<u32>,
	acceleration: Option<u32>,
	tolerance: u32,
	timeout: Duration,
	wait: bool,
}

impl MotionRequest {
	/// The default distance from the goal, in ticks, that counts as arrived.
	pub const DEFAULT_TOLERANCE: u32 = 10;
	/// The default time to wait for the servo to arrive.
	pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

	/// Request a move to `goal` ticks.
	///
	/// By default the profile is left unchanged and the move waits up to
	/// [`DEFAULT_TIMEOUT`](Self::DEFAULT_TIMEOUT) to get within
	/// [`DEFAULT_TOLERANCE`](Self::DEFAULT_TOLERANCE) ticks of the goal.
	pub fn new(goal: i32) -> Self {
		MotionRequest {
			goal,
			velocity: None,
			acceleration: None,
			tolerance: MotionRequest::DEFAULT_TOLERANCE,
			timeout: MotionRequest::DEFAULT_TIMEOUT,
			wait: true,
		}
	}

	/// Set the profile velocity before moving.
	pub fn velocity(&mut self, velocity: u32) -> &mut Self {
		self.velocity = Some(velocity);
		self
	}

	/// Set the profile acceleration before moving.
	pub fn acceleration(&mut self, acceleration: u32) -> &mut Self {
		self.acceleration = Some(acceleration);
		self
	}

	/// Set how close to the goal, in ticks, counts as arrived.
	pub fn tolerance(&mut self, tolerance: u32) -> &mut Self {
		self.tolerance = tolerance;
		self
	}

	/// Set how long to wait for the servo to arrive.
	///
	/// A zero timeout checks the position exactly once.
	pub fn timeout(&mut self, timeout: Duration) -> &mut Self {
		self.timeout = timeout;
		self
	}

	/// Set whether to wait for the servo to arrive at all.
	pub fn wait(&mut self, wait: bool) -> &mut Self {
		self.wait = wait;
		self
	}

	/// The goal position in ticks.
	pub fn goal(&self) -> i32 {
		self.goal
	}
}

/// The result of [`Bus::move_to`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct MotionOutcome {
	/// The last observed position, or the goal if the position was not read.
	pub position: i32,
	/// Whether the servo got within tolerance of the goal. Assumed `true` when
	/// the move did not wait.
	pub converged: bool,
	/// Whether the position was actually read.
	pub polled: bool,
}

/// A bus for exchanging Dynamixel Protocol 2.0 packets with servos.
///
/// See the [`servo`](crate::servo) module documentation for details on how
/// to use a `Bus`.
///
/// Dropping the bus closes the underlying port. Torque is left as it is; use
/// [`release_torque`](Bus::release_torque) or a [`TorqueGuard`] to turn it off.
#[derive(Debug)]
pub struct Bus<B> {
	/// The backend to transmit/receive packets with
	backend: B,
	/// If populated, the error that has "poisoned" the bus. This error MUST be
	/// reported before the bus is used for communication again.
	///
	/// This happens when a [`TimeoutGuard`] cannot restore the original
	/// timeout in its Drop implementation.
	poison: Option<io::Error>,
	/// The torque state each id was last set to during this session.
	torque: BTreeMap<u8, bool>,
}

impl Bus<Serial> {
	/// Open the serial bus at the specified path using the default options.
	///
	/// Alternatively, use [`OpenBusOptions`] to customize how the bus is opened.
	pub fn open_serial(path: &str) -> Result<Bus<Serial>, ServoError> {
		OpenBusOptions::new().open(path)
	}
}

#[cfg(any(test, feature = "mock"))]
#[cfg_attr(all(doc, feature = "doc_cfg"), doc(cfg(feature = "mock")))]
impl Bus<Mock> {
	/// Open a mock bus.
	pub fn open_mock() -> Bus<Mock> {
		Bus::from_backend(Mock::new())
	}
}

impl<B: Backend> Bus<B> {
	/// Get a `Bus` from the given backend.
	pub fn from_backend(backend: B) -> Bus<B> {
		Bus {
			backend,
			poison: None,
			torque: BTreeMap::new(),
		}
	}

	/// Get a reference to the underlying backend.
	pub fn backend(&self) -> &B {
		&self.backend
	}

	/// Get a mutable reference to the underlying backend.
	pub fn backend_mut(&mut self) -> &mut B {
		&mut self.backend
	}

	/// Check if the bus is poisoned and report the error if it exists.
	fn check_poisoned(&mut self) -> Result<(), io::Error> {
		if let Some(poison) = self.poison.take() {
			Err(poison)
		} else {
			Ok(())
		}
	}

	fn backend_name(&self) -> String {
		self.backend
			.name()
			.unwrap_or_else(|| UNKNOWN_BACKEND_NAME.to_string())
	}

	/// Set the bus's packet timeout and return a "scope guard" that will reset
	/// the timeout when it goes out of scope.
	///
	/// While the guard is in scope, the bus can only be accessed through the
	/// guard. However, because the guard implements [`Deref`](std::ops::Deref)
	/// and [`DerefMut`](std::ops::DerefMut) callers can treat the guard as the
	/// bus.
	pub fn timeout_guard(
		&mut self,
		timeout: Option<Duration>,
	) -> Result<TimeoutGuard<'_, B, Self>, io::Error> {
		self.check_poisoned()?;
		TimeoutGuard::new(self, timeout)
	}

	/// Read exactly `buf.len()` bytes, normalizing any failure.
	fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), CommStatus> {
		self.backend.read_exact(buf).map_err(|err| {
			if err.kind() == io::ErrorKind::TimedOut {
				CommStatus::RxTimeout
			} else {
				log::debug!("{} RX failed: {err}", self.backend_name());
				CommStatus::RxFail
			}
		})
	}

	/// Receive one complete frame, skipping any bytes before the header.
	fn receive_frame(&mut self) -> Result<Vec<u8>, CommStatus> {
		let mut frame = Vec::with_capacity(packet::PREFIX_LEN + 8);
		let mut skipped = 0;
		let mut byte = [0u8; 1];
		while !frame.ends_with(&packet::HEADER) {
			if frame.len() == packet::HEADER.len() {
				frame.remove(0);
				skipped += 1;
				if skipped > MAX_LEADING_NOISE {
					log::debug!("{} RX: no packet header found", self.backend_name());
					return Err(CommStatus::RxCorrupt);
				}
			}
			self.read_exact(&mut byte)?;
			frame.push(byte[0]);
		}

		frame.resize(packet::PREFIX_LEN, 0);
		self.read_exact(&mut frame[packet::HEADER.len()..])?;
		let mut prefix = [0u8; packet::PREFIX_LEN];
		prefix.copy_from_slice(&frame);
		let len = match packet::frame_len(&prefix) {
			Ok(len) if len <= MAX_FRAME_LEN => len,
			_ => {
				log::debug!("{} RX: bad length in {:?}", self.backend_name(), prefix);
				return Err(CommStatus::RxCorrupt);
			}
		};
		frame.resize(len, 0);
		self.read_exact(&mut frame[packet::PREFIX_LEN..])?;
		Ok(frame)
	}

	/// Perform one register transaction.
	fn transact(
		&mut self,
		id: u8,
		access: Access,
		register: Register,
		params: &[u8],
	) -> TransactionResult {
		let failed = |status| TransactionResult::failed(id, access, register, status);

		if let Err(err) = self.check_poisoned() {
			log::warn!("{} is unusable: {err}", self.backend_name());
			return failed(CommStatus::PortBusy);
		}
		let code = match access {
			Access::Read => instruction::READ,
			Access::Write => instruction::WRITE,
		};
		let frame = match packet::encode(id, code, params) {
			Ok(frame) => frame,
			Err(err) => {
				log::debug!("cannot build packet for id {id}: {err}");
				return failed(CommStatus::TxError);
			}
		};
		if let Err(err) = self.backend.clear_input() {
			log::debug!("{} cannot discard stale input: {err}", self.backend_name());
			return failed(CommStatus::PortBusy);
		}

		log::debug!("{} TX: {:?}", self.backend_name(), frame);
		if let Err(err) = self
			.backend
			.write_all(&frame)
			.and_then(|()| self.backend.flush())
		{
			log::debug!("{} TX failed: {err}", self.backend_name());
			return failed(CommStatus::TxFail);
		}

		let reply = match self.receive_frame() {
			Ok(reply) => reply,
			Err(status) => return failed(status),
		};
		log::debug!("{} RX: {:?}", self.backend_name(), reply);

		let status = match packet::decode(&reply) {
			Ok(status) => status,
			Err(err) => {
				log::debug!("{} RX: {err}", self.backend_name());
				return failed(CommStatus::RxCorrupt);
			}
		};
		if status.instruction != instruction::STATUS || status.id != id {
			log::debug!(
				"{} RX: expected a status packet from id {id}, got instruction 0x{:02X} from id {}",
				self.backend_name(),
				status.instruction,
				status.id
			);
			return failed(CommStatus::RxCorrupt);
		}
		let Some((&error, data)) = status.params.split_first() else {
			return failed(CommStatus::RxCorrupt);
		};
		let device_error = DeviceError::from_raw(error);
		if !device_error.is_none() {
			log::warn!(
				"id {id} reported \"{device_error}\" for {access} of address {}",
				register.address()
			);
		}

		let value = match access {
			Access::Write => None,
			Access::Read => {
				let width = usize::from(register.width().bytes());
				let Some(data) = data.get(..width) else {
					return TransactionResult::new(
						id,
						access,
						register,
						CommStatus::RxCorrupt,
						device_error,
						None,
					);
				};
				let mut bytes = [0u8; 4];
				bytes[..width].copy_from_slice(data);
				Some(u32::from_le_bytes(bytes))
			}
		};
		TransactionResult::new(
			id,
			access,
			register,
			CommStatus::Success,
			device_error,
			value,
		)
	}

	/// Read `register` on servo `id`.
	///
	/// On success the result carries the value read.
	pub fn read_register(&mut self, id: u8, register: Register) -> TransactionResult {
		let params = packet::read_params(register.address(), register.width().bytes());
		self.transact(id, Access::Read, register, &params)
	}

	/// Write `value` to `register` on servo `id`.
	///
	/// Only as many low bytes of `value` as fit in the register are written.
	pub fn write_register(&mut self, id: u8, register: Register, value: u32) -> TransactionResult {
		let width = usize::from(register.width().bytes());
		let params = packet::write_params(register.address(), &value.to_le_bytes()[..width]);
		self.transact(id, Access::Write, register, &params)
	}

	/// Enable or disable torque on servo `id`.
	///
	/// A disable request reads the register back and returns that read, so
	/// the result's value is the torque state the servo reports.
	pub fn set_torque(
		&mut self,
		id: u8,
		enabled: bool,
	) -> Result<TransactionResult, TransactionError> {
		let written = self
			.write_register(id, register::TORQUE_ENABLE, u32::from(enabled))
			.require()?;
		self.torque.insert(id, enabled);
		if enabled {
			return Ok(written);
		}
		let observed = self.read_register(id, register::TORQUE_ENABLE).require()?;
		let enabled = observed.value().is_some_and(|value| value != 0);
		self.torque.insert(id, enabled);
		Ok(observed)
	}

	/// Disable torque on servo `id` and return whether torque is still enabled
	/// according to the servo.
	pub fn disable_torque(&mut self, id: u8) -> Result<bool, TransactionError> {
		let observed = self.set_torque(id, false)?;
		Ok(observed.value().is_some_and(|value| value != 0))
	}

	/// The torque state `id` was last set to during this session, if any.
	pub fn torque_state(&self, id: u8) -> Option<bool> {
		self.torque.get(&id).copied()
	}

	/// Try to disable torque on every servo this session enabled it on.
	///
	/// Failures are logged and otherwise ignored.
	pub fn release_torque(&mut self) {
		let enabled: Vec<u8> = self
			.torque
			.iter()
			.filter_map(|(&id, &enabled)| enabled.then_some(id))
			.collect();
		for id in enabled {
			self.try_disable_torque(id);
		}
	}

	/// Try to disable torque on servo `id` without reading it back.
	///
	/// A failure is logged and otherwise ignored. Returns whether the write
	/// completed.
	pub fn try_disable_torque(&mut self, id: u8) -> bool {
		let disabled = self
			.write_register(id, register::TORQUE_ENABLE, 0)
			.attempt_best_effort();
		if disabled {
			self.torque.insert(id, false);
		}
		disabled
	}

	/// Set the motion profile of servo `id`.
	///
	/// Either value may be omitted. The writes are best effort: some models do
	/// not support them, so failures are logged and otherwise ignored.
	pub fn configure_profile(&mut self, id: u8, velocity: Option<u32>, acceleration: Option<u32>) {
		if let Some(acceleration) = acceleration {
			self.write_register(id, register::PROFILE_ACCELERATION, acceleration)
				.attempt_best_effort();
		}
		if let Some(velocity) = velocity {
			self.write_register(id, register::PROFILE_VELOCITY, velocity)
				.attempt_best_effort();
		}
	}

	/// Read the present position of servo `id` in ticks.
	pub fn read_position(&mut self, id: u8) -> Result<i32, TransactionError> {
		let result = self
			.read_register(id, register::PRESENT_POSITION)
			.require()?;
		// A completed read always carries a value.
		Ok(result.value_i32().unwrap_or_default())
	}

	/// Read the operating mode of servo `id`.
	pub fn read_operating_mode(&mut self, id: u8) -> Result<OperatingMode, TransactionError> {
		let result = self.read_register(id, register::OPERATING_MODE).require()?;
		let [raw, ..] = result.value().unwrap_or_default().to_le_bytes();
		Ok(OperatingMode::from_raw(raw))
	}

	/// Move servo `id` to the requested goal.
	///
	/// The profile is set first (best effort), then torque is enabled and the
	/// goal written. Failing to enable torque or write the goal is an error.
	///
	/// If the request waits, the present position is read every
	/// [`POLL_INTERVAL`] until it is within tolerance of the goal or the
	/// request's timeout passes. Not arriving in time is not an error: the
	/// outcome reports the last position with `converged` set to `false`.
	///
	/// ## Example
	///
	/// ```
	/// # use pipette::{backend::Backend, servo::{Bus, MotionRequest}};
	/// # fn wrapper<B: Backend>(mut bus: Bus<B>) -> Result<(), Box<dyn std::error::Error>> {
	/// let outcome = bus.move_to(1, MotionRequest::new(1192).velocity(20).acceleration(5))?;
	/// println!("{outcome:?}");
	/// # Ok(())
	/// # }
	/// ```
	pub fn move_to(
		&mut self,
		id: u8,
		request: &MotionRequest,
	) -> Result<MotionOutcome, TransactionError> {
		self.configure_profile(id, request.velocity, request.acceleration);
		self.set_torque(id, true)?;
		self.write_register(
			id,
			register::GOAL_POSITION,
			u32::from_le_bytes(request.goal.to_le_bytes()),
		)
		.require()?;

		if !request.wait {
			return Ok(MotionOutcome {
				position: request.goal,
				converged: true,
				polled: false,
			});
		}

		// A timeout too long to represent as a deadline never expires.
		let deadline = Instant::now().checked_add(request.timeout);
		loop {
			let position = self.read_position(id)?;
			let distance = (i64::from(position) - i64::from(request.goal)).unsigned_abs();
			if distance <= u64::from(request.tolerance) {
				return Ok(MotionOutcome {
					position,
					converged: true,
					polled: true,
				});
			}
			let pause = match deadline {
				Some(deadline) => {
					let now = Instant::now();
					if now >= deadline {
						log::debug!(
							"id {id} did not reach {} within {:?}; last position {position}",
							request.goal,
							request.timeout
						);
						return Ok(MotionOutcome {
							position,
							converged: false,
							polled: true,
						});
					}
					POLL_INTERVAL.min(deadline - now)
				}
				None => POLL_INTERVAL,
			};
			std::thread::sleep(pause);
		}
	}

	/// Return a guard that disables torque on `id` when it goes out of scope.
	///
	/// While the guard is in scope, the bus can only be accessed through the
	/// guard, which dereferences to the bus.
	///
	/// ## Example
	///
	/// ```
	/// # use pipette::{backend::Backend, servo::{Bus, MotionRequest}};
	/// # fn wrapper<B: Backend>(mut bus: Bus<B>) -> Result<(), Box<dyn std::error::Error>> {
	/// {
	///     let mut guard = bus.torque_guard(1);
	///     guard.move_to(1, &MotionRequest::new(1192))?;
	/// } // Torque on servo 1 is disabled here, even if the move failed.
	/// # Ok(())
	/// # }
	/// ```
	pub fn torque_guard(&mut self, id: u8) -> TorqueGuard<'_, B> {
		TorqueGuard { bus: self, id }
	}
}

impl<B: Backend> crate::timeout_guard::Port<B> for Bus<B> {
	fn backend_mut(&mut self) -> &mut B {
		&mut self.backend
	}

	fn poison(&mut self, error: io::Error) {
		self.poison = Some(error);
	}
}

/// A "scope guard" that disables torque on one servo when it goes out of
/// scope, whether by normal exit, early return, or unwinding.
///
/// To create a guard, use [`Bus::torque_guard`].
#[derive(Debug)]
pub struct TorqueGuard<'a, B: Backend> {
	bus: &'a mut Bus<B>,
	id: u8,
}

impl<B: Backend> TorqueGuard<'_, B> {
	/// The id whose torque will be disabled.
	pub fn id(&self) -> u8 {
		self.id
	}
}

impl<B: Backend> std::ops::Deref for TorqueGuard<'_, B> {
	type Target = Bus<B>;
	fn deref(&self) -> &Self::Target {
		self.bus
	}
}

impl<B: Backend> std::ops::DerefMut for TorqueGuard<'_, B> {
	fn deref_mut(&mut self) -> &mut Self::Target {
		self.bus
	}
}

impl<B: Backend> Drop for TorqueGuard<'_, B> {
	fn drop(&mut self) {
		log::debug!("disabling torque on id {}", self.id);
		self.bus.try_disable_torque(self.id);
	}
}

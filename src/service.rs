//! One request/response surface over both devices.
//!
//! A [`Service`] opens a fresh connection for every request, holds the lock
//! for that device class while the connection is open, and closes the
//! connection before releasing the lock. Requests for the printer and for
//! the servo bus never block each other.
//!
//! ```
//! # use pipette::service::{Service, ServoRequest};
//! # fn wrapper() -> Result<(), Box<dyn std::error::Error>> {
//! let service = Service::new();
//! let position = service.read_position(&ServoRequest::default())?;
//! println!("servo {} is at {:.1}°", position.id, position.present_degrees);
//! # Ok(())
//! # }
//! ```
//!
//! The service is cheap to clone and every clone shares the same locks, so
//! it can be handed to each thread that serves requests.

use crate::{
	backend::{Backend, Serial},
	error::{Error, GcodeError, ServoError},
	gcode::{OpenSerialOptions, Printer, ResponseLine},
	lock::{LockRegistry, Resource},
	position::ticks_to_degrees,
	servo::{Bus, MotionRequest, OpenBusOptions},
};
use std::{io, sync::Arc, time::Duration};

/// The printer's serial port when none is given.
pub const DEFAULT_PRINTER_PORT: &str = "/dev/ttyUSB0";

/// The servo bus's serial device when none is given.
pub const DEFAULT_SERVO_DEVICE: &str = "/dev/ttyACM0";

/// The servo id when none is given.
pub const DEFAULT_SERVO_ID: u8 = 1;

/// Shown for port details the system does not report.
const NOT_AVAILABLE: &str = "n/a";

/// Opens the connections a [`Service`] uses.
///
/// [`SerialConnector`] opens real serial ports. Other implementations can
/// hand out mock backends for testing.
pub trait Connector {
	/// The backend printers are opened with.
	type Printer: Backend;
	/// The backend servo buses are opened with.
	type Bus: Backend;

	/// Open the printer at `path`.
	///
	/// `timeout` is the port's read timeout.
	fn open_printer(
		&self,
		path: &str,
		baud_rate: u32,
		timeout: Duration,
	) -> Result<Printer<Self::Printer>, GcodeError>;

	/// Open the servo bus at `path`.
	fn open_bus(&self, path: &str, baud_rate: u32) -> Result<Bus<Self::Bus>, ServoError>;
}

/// A [`Connector`] that opens serial ports.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialConnector;

impl Connector for SerialConnector {
	type Printer = Serial;
	type Bus = Serial;

	fn open_printer(
		&self,
		path: &str,
		baud_rate: u32,
		timeout: Duration,
	) -> Result<Printer<Serial>, GcodeError> {
		OpenSerialOptions::new()
			.baud_rate(baud_rate)
			.timeout(Some(timeout))
			.open(path)
	}

	fn open_bus(&self, path: &str, baud_rate: u32) -> Result<Bus<Serial>, ServoError> {
		OpenBusOptions::new().baud_rate(baud_rate).open(path)
	}
}

/// A serial port present on the system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
	/// The path used to open the port, e.g., `/dev/ttyUSB0`.
	pub device: String,
	/// A human readable description, or `n/a`.
	pub description: String,
	/// The hardware id, e.g., `USB VID:PID=1A86:7523 SER=0001`, or `n/a`.
	pub hwid: String,
}

impl From<serialport::SerialPortInfo> for PortInfo {
	fn from(info: serialport::SerialPortInfo) -> Self {
		let (description, hwid) = match info.port_type {
			serialport::SerialPortType::UsbPort(usb) => {
				let mut hwid = format!("USB VID:PID={:04X}:{:04X}", usb.vid, usb.pid);
				if let Some(serial_number) = usb.serial_number.filter(|s| !s.is_empty()) {
					hwid.push_str(" SER=");
					hwid.push_str(&serial_number);
				}
				let description = usb
					.product
					.or(usb.manufacturer)
					.unwrap_or_else(|| NOT_AVAILABLE.to_string());
				(description, hwid)
			}
			serialport::SerialPortType::PciPort => ("PCI".to_string(), NOT_AVAILABLE.to_string()),
			serialport::SerialPortType::BluetoothPort => {
				("Bluetooth".to_string(), NOT_AVAILABLE.to_string())
			}
			serialport::SerialPortType::Unknown => {
				(NOT_AVAILABLE.to_string(), NOT_AVAILABLE.to_string())
			}
		};
		PortInfo {
			device: info.port_name,
			description,
			hwid,
		}
	}
}

/// Send G-code to the printer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendGcodeRequest {
	/// The G-code to send. May contain several lines; blank lines are skipped.
	pub gcode: String,
	/// The printer's serial port.
	pub port: String,
	/// The printer's baud rate.
	pub baud: u32,
	/// How long to wait for each line to be acknowledged.
	pub timeout: Duration,
	/// Whether to wait for all moves to finish after the last line.
	pub wait_for_move: bool,
}

impl SendGcodeRequest {
	/// A request to send `gcode` with the default port and timing.
	pub fn new<S: Into<String>>(gcode: S) -> Self {
		SendGcodeRequest {
			gcode: gcode.into(),
			..SendGcodeRequest::default()
		}
	}
}

impl Default for SendGcodeRequest {
	fn default() -> Self {
		SendGcodeRequest {
			gcode: String::new(),
			port: DEFAULT_PRINTER_PORT.to_string(),
			baud: OpenSerialOptions::DEFAULT_BAUD_RATE,
			timeout: OpenSerialOptions::DEFAULT_TIMEOUT,
			wait_for_move: true,
		}
	}
}

/// The result of [`Service::send_gcode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendGcodeResponse {
	/// The printer's serial port.
	pub port: String,
	/// The printer's baud rate.
	pub baud: u32,
	/// Every non-empty line received, in arrival order.
	pub responses: Vec<String>,
	/// Whether the moves finished in time, or `None` if not requested.
	pub move_completed: Option<bool>,
}

/// Address one servo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServoRequest {
	/// The bus's serial device.
	pub device: String,
	/// The bus's baud rate.
	pub baud: u32,
	/// The servo's id.
	pub id: u8,
}

impl Default for ServoRequest {
	fn default() -> Self {
		ServoRequest {
			device: DEFAULT_SERVO_DEVICE.to_string(),
			baud: OpenBusOptions::DEFAULT_BAUD_RATE,
			id: DEFAULT_SERVO_ID,
		}
	}
}

/// Move one servo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServoMoveRequest {
	/// The servo to move.
	pub servo: ServoRequest,
	/// The goal in ticks.
	pub goal_position: i32,
	/// The profile velocity, if it should be set.
	pub velocity: Option<u32>,
	/// The profile acceleration, if it should be set.
	pub acceleration: Option<u32>,
	/// Whether to wait for the servo to reach the goal.
	pub wait: bool,
	/// The longest to wait.
	pub wait_timeout: Duration,
	/// How close in ticks counts as arrived.
	pub tolerance: u32,
}

impl ServoMoveRequest {
	/// A request to move the default servo to `goal_position`, waiting up to
	/// 5 seconds for it to arrive within 10 ticks.
	pub fn new(goal_position: i32) -> Self {
		ServoMoveRequest {
			servo: ServoRequest::default(),
			goal_position,
			velocity: None,
			acceleration: None,
			wait: true,
			wait_timeout: MotionRequest::DEFAULT_TIMEOUT,
			tolerance: MotionRequest::DEFAULT_TOLERANCE,
		}
	}
}

/// The torque state of a servo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServoTorqueResponse {
	/// The servo's id.
	pub id: u8,
	/// Whether the servo reports torque as enabled.
	pub torque_enabled: bool,
}

/// The position of a servo.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServoPositionResponse {
	/// The servo's id.
	pub id: u8,
	/// The position in ticks.
	pub present_position: i32,
	/// The position within one revolution, in degrees.
	pub present_degrees: f64,
}

impl ServoPositionResponse {
	fn new(id: u8, present_position: i32) -> Self {
		ServoPositionResponse {
			id,
			present_position,
			present_degrees: ticks_to_degrees(i64::from(present_position)),
		}
	}
}

/// Serves device requests, one session per request.
#[derive(Debug, Clone)]
pub struct Service<C = SerialConnector> {
	locks: Arc<LockRegistry>,
	connector: C,
}

impl Service<SerialConnector> {
	/// Create a service that opens serial ports, with its own locks.
	pub fn new() -> Self {
		Service::with_connector(SerialConnector)
	}
}

impl Default for Service<SerialConnector> {
	fn default() -> Self {
		Service::new()
	}
}

impl<C: Connector> Service<C> {
	/// Create a service that opens devices with `connector`, with its own locks.
	pub fn with_connector(connector: C) -> Self {
		Service::with_locks(Arc::new(LockRegistry::new()), connector)
	}

	/// Create a service that shares `locks` with other users of the devices.
	pub fn with_locks(locks: Arc<LockRegistry>, connector: C) -> Self {
		Service { locks, connector }
	}

	/// The locks this service takes.
	pub fn locks(&self) -> &Arc<LockRegistry> {
		&self.locks
	}

	/// List the serial ports present on the system.
	pub fn list_ports(&self) -> Result<Vec<PortInfo>, Error> {
		let ports = serialport::available_ports().map_err(io::Error::from)?;
		log::debug!("found {} serial ports", ports.len());
		Ok(ports.into_iter().map(PortInfo::from).collect())
	}

	/// Send each line of the request's G-code, then optionally wait for the
	/// printer to finish moving.
	///
	/// Input buffered before the first line is discarded. Lines that are not
	/// acknowledged in time are abandoned without failing the request. The
	/// wait uses the same timeout as each line and its responses are
	/// appended to the others.
	pub fn send_gcode(&self, request: &SendGcodeRequest) -> Result<SendGcodeResponse, Error> {
		self.locks
			.with_exclusive_access(Resource::Printer, || -> Result<_, Error> {
				let mut printer = self
					.connector
					.open_printer(&request.port, request.baud, request.timeout)?;
				log::debug!(
					"printer session on {} at {} baud",
					request.port,
					request.baud
				);
				printer.discard_input()?;
				let mut responses: Vec<String> = printer
					.send_block(&request.gcode, request.timeout)?
					.into_iter()
					.map(ResponseLine::into_text)
					.collect();
				let move_completed = if request.wait_for_move {
					let transcript = printer.wait_for_motion_complete(request.timeout)?;
					let terminated = transcript.terminated();
					responses.extend(
						transcript
							.into_lines()
							.into_iter()
							.map(ResponseLine::into_text),
					);
					Some(terminated)
				} else {
					None
				};
				drop(printer);
				log::debug!("printer session on {} closed", request.port);
				Ok(SendGcodeResponse {
					port: request.port.clone(),
					baud: request.baud,
					responses,
					move_completed,
				})
			})
	}

	/// Disable torque and report the torque state the servo reads back.
	pub fn disable_torque(&self, request: &ServoRequest) -> Result<ServoTorqueResponse, Error> {
		self.with_bus(request, |bus| {
			let torque_enabled = bus.disable_torque(request.id)?;
			Ok(ServoTorqueResponse {
				id: request.id,
				torque_enabled,
			})
		})
	}

	/// Read the servo's present position.
	pub fn read_position(&self, request: &ServoRequest) -> Result<ServoPositionResponse, Error> {
		self.with_bus(request, |bus| {
			let ticks = bus.read_position(request.id)?;
			Ok(ServoPositionResponse::new(request.id, ticks))
		})
	}

	/// Move the servo and optionally wait for it to arrive.
	///
	/// Torque is left enabled. If the servo does not arrive in time, the
	/// last position read is reported. If the request does not wait, the goal
	/// is reported as the position.
	pub fn move_servo(&self, request: &ServoMoveRequest) -> Result<ServoPositionResponse, Error> {
		let mut motion = MotionRequest::new(request.goal_position);
		motion
			.tolerance(request.tolerance)
			.timeout(request.wait_timeout)
			.wait(request.wait);
		if let Some(velocity) = request.velocity {
			motion.velocity(velocity);
		}
		if let Some(acceleration) = request.acceleration {
			motion.acceleration(acceleration);
		}
		let id = request.servo.id;
		self.with_bus(&request.servo, |bus| {
			let outcome = bus.move_to(id, &motion)?;
			Ok(ServoPositionResponse::new(id, outcome.position))
		})
	}

	/// Run `operation` on a bus opened for `request` while holding the servo
	/// lock. The bus is closed before the lock is released.
	fn with_bus<T, F>(&self, request: &ServoRequest, operation: F) -> Result<T, Error>
	where
		F: FnOnce(&mut Bus<C::Bus>) -> Result<T, Error>,
	{
		self.locks
			.with_exclusive_access(Resource::Servo, || -> Result<T, Error> {
				let mut bus = self.connector.open_bus(&request.device, request.baud)?;
				log::debug!(
					"servo session on {} at {} baud",
					request.device,
					request.baud
				);
				let result = operation(&mut bus);
				drop(bus);
				log::debug!("servo session on {} closed", request.device);
				result
			})
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::{
		backend::Mock,
		error::{ConnectionError, ConnectionStage},
		servo::{register, sim::SimBus, CommStatus},
	};
	use static_assertions::assert_impl_all;
	use std::sync::Mutex;

	assert_impl_all!(Service: Clone, Send, Sync);

	/// Opens mock printers that answer every line with `reply` and buses
	/// backed by a simulation.
	#[derive(Debug, Clone)]
	struct MockConnector {
		reply: &'static str,
		written: Arc<Mutex<Vec<u8>>>,
		sim: SimBus,
		missing: bool,
	}

	impl MockConnector {
		fn new(reply: &'static str) -> Self {
			MockConnector {
				reply,
				written: Arc::default(),
				sim: SimBus::new(&[1]),
				missing: false,
			}
		}

		fn written(&self) -> String {
			String::from_utf8(self.written.lock().unwrap().clone()).unwrap()
		}

		fn missing(path: &str, baud_rate: u32) -> ConnectionError {
			ConnectionError::new(
				path,
				baud_rate,
				ConnectionStage::Open,
				serialport::Error::new(
					serialport::ErrorKind::NoDevice,
					"No such file or directory",
				),
			)
		}
	}

	impl Connector for MockConnector {
		type Printer = Mock;
		type Bus = Mock;

		fn open_printer(
			&self,
			path: &str,
			baud_rate: u32,
			_timeout: Duration,
		) -> Result<Printer<Mock>, GcodeError> {
			if self.missing {
				return Err(MockConnector::missing(path, baud_rate).into());
			}
			let reply = self.reply;
			let written = Arc::clone(&self.written);
			let mut mock = Mock::with_responder(move |line| {
				written.lock().unwrap().extend_from_slice(line);
				reply.as_bytes().to_vec()
			});
			mock.push("start\necho:SD card ok\n");
			Ok(Printer::from_backend(mock))
		}

		fn open_bus(&self, path: &str, baud_rate: u32) -> Result<Bus<Mock>, ServoError> {
			if self.missing {
				return Err(MockConnector::missing(path, baud_rate).into());
			}
			Ok(self.sim.bus())
		}
	}

	#[test]
	fn send_gcode_waits_for_move() {
		let connector = MockConnector::new("ok\n");
		let service = Service::with_connector(connector.clone());
		let response = service
			.send_gcode(&SendGcodeRequest::new("G28\n\nG1 X10 F3000\n"))
			.unwrap();
		assert_eq!(
			response,
			SendGcodeResponse {
				port: DEFAULT_PRINTER_PORT.to_string(),
				baud: 115_200,
				responses: vec!["ok".to_string(); 3],
				move_completed: Some(true),
			}
		);
		assert_eq!(connector.written(), "G28\nG1 X10 F3000\nM400\n");
	}

	#[test]
	fn send_gcode_without_wait() {
		let connector = MockConnector::new("ok\n");
		let service = Service::with_connector(connector.clone());
		let mut request = SendGcodeRequest::new("G90");
		request.wait_for_move = false;
		let response = service.send_gcode(&request).unwrap();
		assert_eq!(response.responses, ["ok"]);
		assert_eq!(response.move_completed, None);
		assert_eq!(connector.written(), "G90\n");
	}

	#[test]
	fn silent_printer_reports_incomplete_move() {
		let service = Service::with_connector(MockConnector::new(""));
		let mut request = SendGcodeRequest::new("G28");
		request.timeout = Duration::from_millis(100);
		let response = service.send_gcode(&request).unwrap();
		assert!(response.responses.is_empty());
		assert_eq!(response.move_completed, Some(false));
	}

	#[test]
	fn missing_printer_is_a_connection_error() {
		let mut connector = MockConnector::new("ok\n");
		connector.missing = true;
		let service = Service::with_connector(connector);
		let mut request = SendGcodeRequest::new("G28");
		request.port = "/dev/ttyUSB7".to_string();
		let err = service.send_gcode(&request).unwrap_err();
		let Error::Connection(err) = err else {
			panic!("unexpected error {err:?}");
		};
		assert_eq!(err.path(), "/dev/ttyUSB7");
		assert!(err.is_unavailable());
	}

	#[test]
	fn disable_torque_reports_read_back() {
		let connector = MockConnector::new("");
		let service = Service::with_connector(connector.clone());
		connector.sim.state().set(1, register::TORQUE_ENABLE, 1);
		let response = service.disable_torque(&ServoRequest::default()).unwrap();
		assert_eq!(
			response,
			ServoTorqueResponse {
				id: 1,
				torque_enabled: false
			}
		);
		assert_eq!(
			connector.sim.state().writes_to(1, register::TORQUE_ENABLE),
			[0]
		);

		connector.sim.state().torque_stuck = true;
		connector.sim.state().set(1, register::TORQUE_ENABLE, 1);
		let response = service.disable_torque(&ServoRequest::default()).unwrap();
		assert!(response.torque_enabled);
	}

	#[test]
	fn read_position_converts_to_degrees() {
		let connector = MockConnector::new("");
		let service = Service::with_connector(connector.clone());
		connector
			.sim
			.state()
			.set(1, register::PRESENT_POSITION, 1024);
		let response = service.read_position(&ServoRequest::default()).unwrap();
		assert_eq!(
			response,
			ServoPositionResponse {
				id: 1,
				present_position: 1024,
				present_degrees: 90.0
			}
		);

		let negative = u32::from_le_bytes((-1024i32).to_le_bytes());
		connector
			.sim
			.state()
			.set(1, register::PRESENT_POSITION, negative);
		let response = service.read_position(&ServoRequest::default()).unwrap();
		assert_eq!(response.present_position, -1024);
		assert_eq!(response.present_degrees, 270.0);
	}

	#[test]
	fn unknown_servo_is_a_transaction_error() {
		let service = Service::with_connector(MockConnector::new(""));
		let request = ServoRequest {
			id: 9,
			..ServoRequest::default()
		};
		let err = service.read_position(&request).unwrap_err();
		let Error::Transaction(err) = err else {
			panic!("unexpected error {err:?}");
		};
		assert_eq!(err.id(), 9);
		assert_eq!(err.address(), register::PRESENT_POSITION.address());
		assert_eq!(err.status(), CommStatus::RxTimeout);
	}

	#[test]
	fn move_servo_waits_for_arrival() {
		let connector = MockConnector::new("");
		let service = Service::with_connector(connector.clone());
		let mut request = ServoMoveRequest::new(2048);
		request.velocity = Some(20);
		request.acceleration = Some(5);
		let response = service.move_servo(&request).unwrap();
		assert_eq!(response.present_position, 2048);
		assert_eq!(response.present_degrees, 180.0);

		let state = connector.sim.state();
		let addresses: Vec<u16> = state.received.iter().map(|r| r.address).collect();
		assert_eq!(
			addresses[..4],
			[
				register::PROFILE_ACCELERATION.address(),
				register::PROFILE_VELOCITY.address(),
				register::TORQUE_ENABLE.address(),
				register::GOAL_POSITION.address(),
			]
		);
		assert_eq!(state.reads_of(1, register::PRESENT_POSITION), 1);
		assert_eq!(state.get(1, register::TORQUE_ENABLE), 1);
	}

	#[test]
	fn move_servo_without_wait_reports_goal() {
		let connector = MockConnector::new("");
		connector.sim.state().follow_goal = false;
		let service = Service::with_connector(connector.clone());
		let mut request = ServoMoveRequest::new(-100);
		request.wait = false;
		let response = service.move_servo(&request).unwrap();
		assert_eq!(response.present_position, -100);
		assert_eq!(response.present_degrees, ticks_to_degrees(-100));
		let state = connector.sim.state();
		assert_eq!(state.reads_of(1, register::PRESENT_POSITION), 0);
		assert!(state.writes_to(1, register::PROFILE_VELOCITY).is_empty());
	}

	#[test]
	fn move_servo_timeout_reports_last_position() {
		let connector = MockConnector::new("");
		connector.sim.state().follow_goal = false;
		connector
			.sim
			.state()
			.set(1, register::PRESENT_POSITION, 500);
		let service = Service::with_connector(connector);
		let mut request = ServoMoveRequest::new(3000);
		request.wait_timeout = Duration::from_millis(120);
		let response = service.move_servo(&request).unwrap();
		assert_eq!(response.present_position, 500);
	}

	#[test]
	fn device_classes_do_not_block_each_other() {
		let connector = MockConnector::new("ok\n");
		let service = Service::with_connector(connector);
		let _printer = service.locks().lock(Resource::Printer);
		assert!(service.read_position(&ServoRequest::default()).is_ok());
		assert!(service.locks().try_lock(Resource::Printer).is_none());
	}

	#[test]
	fn lock_is_released_after_failure() {
		let service = Service::with_connector(MockConnector::new(""));
		let request = ServoRequest {
			id: 42,
			..ServoRequest::default()
		};
		assert!(service.read_position(&request).is_err());
		assert!(service.locks().try_lock(Resource::Servo).is_some());
	}

	#[test]
	fn usb_port_info() {
		let info = serialport::SerialPortInfo {
			port_name: "/dev/ttyUSB0".to_string(),
			port_type: serialport::SerialPortType::UsbPort(serialport::UsbPortInfo {
				vid: 0x1a86,
				pid: 0x7523,
				serial_number: Some("0001".to_string()),
				manufacturer: Some("QinHeng Electronics".to_string()),
				product: Some("USB Serial".to_string()),
			}),
		};
		assert_eq!(
			PortInfo::from(info),
			PortInfo {
				device: "/dev/ttyUSB0".to_string(),
				description: "USB Serial".to_string(),
				hwid: "USB VID:PID=1A86:7523 SER=0001".to_string(),
			}
		);

		let info = serialport::SerialPortInfo {
			port_name: "/dev/ttyS0".to_string(),
			port_type: serialport::SerialPortType::Unknown,
		};
		let info = PortInfo::from(info);
		assert_eq!(info.description, "n/a");
		assert_eq!(info.hwid, "n/a");
	}
}

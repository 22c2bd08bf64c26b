//! A simulated servo bus for tests.
//!
//! The simulation answers instruction packets written to a [`Mock`] backend
//! the way a chain of servos would, keeping one control table per id.

use super::{
	packet::{self, instruction},
	register::{self, Register},
	Bus,
};
use crate::backend::Mock;
use std::{
	collections::{BTreeMap, BTreeSet},
	sync::{Arc, Mutex, MutexGuard},
};

/// The size of each simulated control table.
const TABLE_SIZE: usize = 256;

/// An instruction received by the simulation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Received {
	pub id: u8,
	pub instruction: u8,
	pub address: u16,
	/// The written bytes, or the requested length for reads.
	pub data: Vec<u8>,
}

#[derive(Debug)]
pub(crate) struct State {
	tables: BTreeMap<u8, Vec<u8>>,
	/// Every instruction addressed to a known id, in order.
	pub received: Vec<Received>,
	/// Whether writing the goal position immediately updates the present position.
	pub follow_goal: bool,
	/// Addresses that never get a reply.
	pub silent: BTreeSet<u16>,
	/// Error bytes to report for accesses to an address.
	pub errors: BTreeMap<u16, u8>,
	/// Whether writing zero to torque enable is ignored.
	pub torque_stuck: bool,
}

impl State {
	pub fn set(&mut self, id: u8, register: Register, value: u32) {
		let width = usize::from(register.width().bytes());
		let address = usize::from(register.address());
		if let Some(table) = self.tables.get_mut(&id) {
			table[address..address + width].copy_from_slice(&value.to_le_bytes()[..width]);
		}
	}

	pub fn get(&self, id: u8, register: Register) -> u32 {
		let width = usize::from(register.width().bytes());
		let address = usize::from(register.address());
		let mut bytes = [0u8; 4];
		bytes[..width].copy_from_slice(&self.tables[&id][address..address + width]);
		u32::from_le_bytes(bytes)
	}

	/// The values written to `register` on `id`, in order.
	pub fn writes_to(&self, id: u8, register: Register) -> Vec<u32> {
		self.received
			.iter()
			.filter(|r| {
				r.id == id && r.instruction == instruction::WRITE && r.address == register.address()
			})
			.map(|r| {
				let mut bytes = [0u8; 4];
				bytes[..r.data.len()].copy_from_slice(&r.data);
				u32::from_le_bytes(bytes)
			})
			.collect()
	}

	/// The number of reads of `register` on `id`.
	pub fn reads_of(&self, id: u8, register: Register) -> usize {
		self.received
			.iter()
			.filter(|r| {
				r.id == id && r.instruction == instruction::READ && r.address == register.address()
			})
			.count()
	}

	fn respond(&mut self, frame: &[u8]) -> Vec<u8> {
		let Ok(request) = packet::decode(frame) else {
			return Vec::new();
		};
		if !self.tables.contains_key(&request.id) || request.params.len() < 2 {
			return Vec::new();
		}
		let id = request.id;
		let address = u16::from_le_bytes([request.params[0], request.params[1]]);
		let data = request.params[2..].to_vec();
		self.received.push(Received {
			id,
			instruction: request.instruction,
			address,
			data: data.clone(),
		});
		if self.silent.contains(&address) {
			return Vec::new();
		}
		let error = self.errors.get(&address).copied().unwrap_or(0);
		let start = usize::from(address);

		let mut reply = vec![error];
		match request.instruction {
			instruction::READ => {
				let len = usize::from(u16::from_le_bytes([data[0], data[1]]));
				reply.extend_from_slice(&self.tables[&id][start..start + len]);
			}
			instruction::WRITE => {
				let ignored = address == register::TORQUE_ENABLE.address()
					&& self.torque_stuck
					&& data == [0];
				if !ignored {
					let table = self.tables.get_mut(&id).unwrap();
					table[start..start + data.len()].copy_from_slice(&data);
				}
				if address == register::GOAL_POSITION.address() && self.follow_goal {
					let goal = self.get(id, register::GOAL_POSITION);
					self.set(id, register::PRESENT_POSITION, goal);
				}
			}
			_ => return Vec::new(),
		}
		packet::encode(id, instruction::STATUS, &reply).unwrap()
	}
}

/// A handle to a simulated bus that can be inspected after the bus is in use.
#[derive(Debug, Clone)]
pub(crate) struct SimBus(Arc<Mutex<State>>);

impl SimBus {
	/// Simulate servos with the given ids, in position mode, following goals.
	pub fn new(ids: &[u8]) -> Self {
		let mut tables = BTreeMap::new();
		for &id in ids {
			let mut table = vec![0u8; TABLE_SIZE];
			table[usize::from(register::OPERATING_MODE.address())] = 3;
			tables.insert(id, table);
		}
		SimBus(Arc::new(Mutex::new(State {
			tables,
			received: Vec::new(),
			follow_goal: true,
			silent: BTreeSet::new(),
			errors: BTreeMap::new(),
			torque_stuck: false,
		})))
	}

	pub fn state(&self) -> MutexGuard<'_, State> {
		self.0.lock().unwrap()
	}

	/// A mock backend answered by this simulation.
	pub fn mock(&self) -> Mock {
		let state = Arc::clone(&self.0);
		Mock::with_responder(move |frame| state.lock().unwrap().respond(frame))
	}

	/// A bus over a mock backend answered by this simulation.
	pub fn bus(&self) -> Bus<Mock> {
		Bus::from_backend(self.mock())
	}
}

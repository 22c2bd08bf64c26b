//! Exclusive access to each physical bus.
//!
//! Every session with a device (open, exchange, close) runs while holding the
//! lock for that device's [`Resource`] class. Each class is a single physical
//! bus, so there is one lock per class rather than one per device id.
//!
//! ```
//! use pipette::lock::{LockRegistry, Resource};
//!
//! let locks = LockRegistry::new();
//! let answer = locks.with_exclusive_access(Resource::Servo, || {
//!     // Open the bus, talk to the servo, and close the bus here.
//!     42
//! });
//! assert_eq!(answer, 42);
//! ```

use std::sync::{Mutex, MutexGuard, TryLockError};

/// A class of physical resource that only one session may use at a time.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Resource {
	/// The printer's serial line.
	Printer,
	/// The servo bus shared by every servo id.
	Servo,
}

impl std::fmt::Display for Resource {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Resource::Printer => f.write_str("printer"),
			Resource::Servo => f.write_str("servo"),
		}
	}
}

/// One exclusive lock per [`Resource`] class.
///
/// Construct it once when the process starts and share it (e.g., with an
/// [`Arc`](std::sync::Arc)) with everything that opens devices.
#[derive(Debug, Default)]
pub struct LockRegistry {
	printer: Mutex<()>,
	servo: Mutex<()>,
}

impl LockRegistry {
	/// Create a registry with every resource unlocked.
	pub fn new() -> Self {
		LockRegistry::default()
	}

	fn mutex(&self, resource: Resource) -> &Mutex<()> {
		match resource {
			Resource::Printer => &self.printer,
			Resource::Servo => &self.servo,
		}
	}

	/// Block until `resource` is free and return a guard that holds it.
	///
	/// The lock is released when the guard is dropped.
	///
	/// A session that panicked while holding the lock does not keep it
	/// locked forever: the poisoning is logged and cleared.
	pub fn lock(&self, resource: Resource) -> ResourceGuard<'_> {
		log::trace!("waiting for the {resource} lock");
		let mutex = self.mutex(resource);
		let guard = mutex.lock().unwrap_or_else(|poisoned| {
			log::warn!("a previous {resource} session panicked; recovering the lock");
			mutex.clear_poison();
			poisoned.into_inner()
		});
		log::debug!("acquired the {resource} lock");
		ResourceGuard {
			resource,
			_guard: guard,
		}
	}

	/// Take `resource` if it is free right now.
	pub fn try_lock(&self, resource: Resource) -> Option<ResourceGuard<'_>> {
		let mutex = self.mutex(resource);
		let guard = match mutex.try_lock() {
			Ok(guard) => guard,
			Err(TryLockError::WouldBlock) => return None,
			Err(TryLockError::Poisoned(poisoned)) => {
				log::warn!("a previous {resource} session panicked; recovering the lock");
				mutex.clear_poison();
				poisoned.into_inner()
			}
		};
		log::debug!("acquired the {resource} lock");
		Some(ResourceGuard {
			resource,
			_guard: guard,
		})
	}

	/// Run `operation` while holding the lock for `resource`.
	///
	/// The lock is released on every exit path, including when `operation`
	/// returns an error or panics. `operation` should open, use, and close
	/// the device itself so the connection never outlives the lock.
	pub fn with_exclusive_access<T, F>(&self, resource: Resource, operation: F) -> T
	where
		F: FnOnce() -> T,
	{
		let _guard = self.lock(resource);
		operation()
	}
}

/// Exclusive ownership of one [`Resource`], released on drop.
#[derive(Debug)]
pub struct ResourceGuard<'a> {
	resource: Resource,
	_guard: MutexGuard<'a, ()>,
}

impl ResourceGuard<'_> {
	/// The resource this guard holds.
	pub fn resource(&self) -> Resource {
		self.resource
	}
}

impl Drop for ResourceGuard<'_> {
	fn drop(&mut self) {
		log::debug!("released the {} lock", self.resource);
	}
}

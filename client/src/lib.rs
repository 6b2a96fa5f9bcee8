pub mod arbitrator;
pub mod connection;
pub mod device;
pub mod discovery;
pub mod error;
pub mod poller;
pub mod service;
pub mod store;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use arbitrator::{ModeArbitrator, ToggleOutcome};
pub use connection::ConnectionManager;
pub use device::DeviceClient;
pub use discovery::{Discovery, NetworkContext};
pub use error::{Error, Result, TransportError};
pub use poller::{StatusPoller, SubscriptionToken};
pub use service::PowerMate;
pub use store::{AddressStore, JsonFileStore, MemoryStore};
pub use transport::{DeviceTransport, HttpTransport, Response};

/// Callbacks run while no lock is held, so a poisoned lock only means a
/// subscriber panicked; the guarded data is still consistent.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

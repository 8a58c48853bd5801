use std::sync::Mutex;

use log::debug;
use slab::Slab;

use crate::{EndpointRef, Error, ErrorKind, Target, ToggleReset};

/// The driver's table of installed endpoints.
///
/// The table holds one reference on every endpoint it contains. Removing an
/// endpoint gives that reference back to the caller; the endpoint itself lives
/// on until every batch referencing it has been destroyed.
pub struct EndpointTable {
    entries: Mutex<Slab<EndpointRef>>,
}

impl EndpointTable {
    pub fn new() -> EndpointTable {
        EndpointTable {
            entries: Mutex::new(Slab::new()),
        }
    }

    /// Install an endpoint, taking over the passed reference.
    ///
    /// Fails with [`ErrorKind::Busy`] if an endpoint matching the same target
    /// is already installed. The reference is released in that case.
    pub fn register(&self, endpoint: EndpointRef) -> Result<(), Error> {
        let mut entries = self.entries.lock().unwrap();
        let target = endpoint.target();
        if entries.iter().any(|(_, e)| e.target().matches(&target)) {
            return Err(Error::new(ErrorKind::Busy, "endpoint already registered").log_debug());
        }
        debug!("Registered endpoint {target}");
        entries.insert(endpoint);
        Ok(())
    }

    /// Take a new reference on the endpoint matching `target`.
    pub fn find(&self, target: Target) -> Option<EndpointRef> {
        let entries = self.entries.lock().unwrap();
        entries
            .iter()
            .find(|(_, e)| e.target().matches(&target))
            .map(|(_, e)| e.add_ref())
    }

    /// Uninstall an endpoint, returning the table's reference.
    pub fn remove(&self, target: Target) -> Result<EndpointRef, Error> {
        let mut entries = self.entries.lock().unwrap();
        let key = entries
            .iter()
            .find(|(_, e)| e.target().matches(&target))
            .map(|(key, _)| key)
            .ok_or(Error::new(ErrorKind::NotFound, "endpoint not registered"))?;
        debug!("Unregistered endpoint {target}");
        Ok(entries.remove(key))
    }

    /// Uninstall every endpoint of the device at `address`, for device
    /// teardown.
    pub fn remove_device(&self, address: u8) -> Vec<EndpointRef> {
        let mut entries = self.entries.lock().unwrap();
        let keys: Vec<usize> = entries
            .iter()
            .filter(|(_, e)| e.target().address == address)
            .map(|(key, _)| key)
            .collect();
        debug!("Unregistering {} endpoints of device {address}", keys.len());
        keys.into_iter().map(|key| entries.remove(key)).collect()
    }

    /// Reset the software data toggle to DATA0 on the endpoints selected by
    /// `mode`, returning how many were reset.
    ///
    /// [`ToggleReset::Endpoint`] selects only the endpoint matching `target`,
    /// direction included; [`ToggleReset::All`] selects every endpoint of
    /// `target.address`.
    pub fn reset_toggle(&self, target: Target, mode: ToggleReset) -> usize {
        let entries = self.entries.lock().unwrap();
        let mut n = 0;
        for (_, e) in entries.iter() {
            let selected = match mode {
                ToggleReset::None => false,
                ToggleReset::Endpoint => e.target().matches(&target),
                ToggleReset::All => e.target().same_device(&target),
            };
            if selected {
                e.set_toggle(false);
                n += 1;
            }
        }
        n
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EndpointTable {
    fn default() -> Self {
        Self::new()
    }
}

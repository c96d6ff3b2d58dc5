//! Port Allocator: derives the next free port from the Environment Store.

use crate::core::error::HovelError;
use crate::core::store::EnvironmentStore;
use std::collections::BTreeSet;
use std::sync::Mutex;

pub struct PortAllocator {
    base_port: u16,
    /// Serializes "pick a port, persist the record" within this process.
    allocation_lock: Mutex<()>,
}

impl PortAllocator {
    pub fn new(base_port: u16) -> Self {
        Self {
            base_port,
            allocation_lock: Mutex::new(()),
        }
    }

    pub fn base_port(&self) -> u16 {
        self.base_port
    }

    /// Smallest port above the base that no current record holds.
    pub fn next_port(&self, store: &dyn EnvironmentStore) -> Result<u16, HovelError> {
        let used: BTreeSet<u16> = store
            .list_all()?
            .values()
            .map(|record| record.port)
            .collect();
        lowest_free_port(self.base_port, &used)
    }

    /// Picks a port and hands it to `persist` while holding the allocation lock.
    /// `persist` must write the record that claims the port before returning, so
    /// the next caller's scan sees it. Other processes are not excluded.
    pub fn reserve<F, R>(&self, store: &dyn EnvironmentStore, persist: F) -> Result<R, HovelError>
    where
        F: FnOnce(u16) -> Result<R, HovelError>,
    {
        let _guard = self
            .allocation_lock
            .lock()
            .map_err(|_| HovelError::LockPoisoned("port allocation".to_string()))?;
        let port = self.next_port(store)?;
        tracing::debug!(port, "reserved port");
        persist(port)
    }
}

fn lowest_free_port(base: u16, used: &BTreeSet<u16>) -> Result<u16, HovelError> {
    let mut candidate = base.checked_add(1);
    while let Some(port) = candidate {
        if !used.contains(&port) {
            return Ok(port);
        }
        candidate = port.checked_add(1);
    }
    Err(HovelError::Conflict(format!(
        "no free port above {} remains",
        base
    )))
}

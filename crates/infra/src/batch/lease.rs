//! Per-connection leases.
//!
//! Two concurrently running batches never process the same connection: a
//! batch must take the connection's lease first and skips the connection if
//! another batch holds it.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use homeflow_core::ConnectionId;

#[derive(Debug, Default, Clone)]
pub struct ConnectionLeases {
    held: Arc<Mutex<HashSet<ConnectionId>>>,
}

impl ConnectionLeases {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` when another holder has the lease.
    pub fn try_acquire(&self, connection_id: ConnectionId) -> Option<ConnectionLease> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        held.insert(connection_id).then(|| ConnectionLease {
            connection_id,
            held: self.held.clone(),
        })
    }

    pub fn is_held(&self, connection_id: ConnectionId) -> bool {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&connection_id)
    }
}

/// Released on drop, including when the holding task panics.
#[derive(Debug)]
pub struct ConnectionLease {
    connection_id: ConnectionId,
    held: Arc<Mutex<HashSet<ConnectionId>>>,
}

impl ConnectionLease {
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }
}

impl Drop for ConnectionLease {
    fn drop(&mut self) {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.connection_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_is_exclusive_until_dropped() {
        let leases = ConnectionLeases::new();
        let c = ConnectionId::new();

        let lease = leases.try_acquire(c).unwrap();
        assert!(leases.try_acquire(c).is_none());
        assert!(leases.is_held(c));

        drop(lease);
        assert!(!leases.is_held(c));
        assert!(leases.try_acquire(c).is_some());
    }
}

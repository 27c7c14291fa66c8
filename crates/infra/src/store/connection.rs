use std::collections::BTreeMap;
use std::sync::RwLock;

use homeflow_ai::UserPreferences;
use homeflow_core::ConnectionId;

use super::StoreError;

/// Which hub connections are active, and their owners' preferences.
pub trait ConnectionDirectory: Send + Sync {
    fn active_connections(&self) -> Result<Vec<ConnectionId>, StoreError>;

    fn preferences(&self, connection_id: ConnectionId) -> Result<UserPreferences, StoreError>;
}

#[derive(Debug, Default)]
pub struct InMemoryConnectionDirectory {
    connections: RwLock<BTreeMap<ConnectionId, (bool, UserPreferences)>>,
}

impl InMemoryConnectionDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, connection_id: ConnectionId, preferences: UserPreferences) -> Result<(), StoreError> {
        self.connections
            .write()
            .map_err(|_| StoreError::Poisoned)?
            .insert(connection_id, (true, preferences));
        Ok(())
    }

    pub fn deactivate(&self, connection_id: ConnectionId) -> Result<(), StoreError> {
        let mut connections = self.connections.write().map_err(|_| StoreError::Poisoned)?;
        let entry = connections
            .get_mut(&connection_id)
            .ok_or_else(|| StoreError::NotFound(connection_id.to_string()))?;
        entry.0 = false;
        Ok(())
    }
}

impl ConnectionDirectory for InMemoryConnectionDirectory {
    fn active_connections(&self) -> Result<Vec<ConnectionId>, StoreError> {
        let connections = self.connections.read().map_err(|_| StoreError::Poisoned)?;
        Ok(connections
            .iter()
            .filter(|(_, (active, _))| *active)
            .map(|(id, _)| *id)
            .collect())
    }

    fn preferences(&self, connection_id: ConnectionId) -> Result<UserPreferences, StoreError> {
        let connections = self.connections.read().map_err(|_| StoreError::Poisoned)?;
        connections
            .get(&connection_id)
            .map(|(_, prefs)| prefs.clone())
            .ok_or_else(|| StoreError::NotFound(connection_id.to_string()))
    }
}

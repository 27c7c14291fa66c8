use std::collections::HashMap;
use std::sync::RwLock;

use homeflow_ai::{ApprovalError, SafetyLimit, SafetyLimitSource};
use homeflow_core::ConnectionId;

/// Per-connection safety limits with an optional fallback for owners who
/// configured none.
#[derive(Debug, Default)]
pub struct InMemorySafetyLimitStore {
    limits: RwLock<HashMap<ConnectionId, Vec<SafetyLimit>>>,
    defaults: Vec<SafetyLimit>,
}

impl InMemorySafetyLimitStore {
    pub fn new(defaults: Vec<SafetyLimit>) -> Self {
        Self {
            limits: RwLock::new(HashMap::new()),
            defaults,
        }
    }

    pub fn set(&self, connection_id: ConnectionId, limits: Vec<SafetyLimit>) -> Result<(), ApprovalError> {
        self.limits
            .write()
            .map_err(|_| ApprovalError::Source("safety limit store poisoned".to_string()))?
            .insert(connection_id, limits);
        Ok(())
    }
}

impl SafetyLimitSource for InMemorySafetyLimitStore {
    fn limits_for(&self, connection_id: ConnectionId) -> Result<Vec<SafetyLimit>, ApprovalError> {
        // A poisoned store fails the evaluation, which the enforcer turns into
        // a required approval.
        let limits = self
            .limits
            .read()
            .map_err(|_| ApprovalError::Source("safety limit store poisoned".to_string()))?;
        Ok(limits
            .get(&connection_id)
            .cloned()
            .unwrap_or_else(|| self.defaults.clone()))
    }
}

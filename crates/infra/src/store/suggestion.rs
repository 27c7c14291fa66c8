//! Suggestion persistence.
//!
//! Suggestions are stored as flat [`SuggestionRow`]s, the shape the external
//! listing and approval layer reads. Conversions in both directions are
//! explicit functions; nested parts (config, validation, approval) travel as
//! JSON text columns.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use homeflow_ai::{Suggestion, SuggestionStatus};
use homeflow_core::{BatchId, ConnectionId, ContextId, SuggestionId};

use super::StoreError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestionRow {
    pub id: Uuid,
    pub context_id: Uuid,
    pub connection_id: Uuid,
    pub batch_id: Option<Uuid>,
    pub title: String,
    pub config_json: String,
    pub confidence: f64,
    pub valid: bool,
    pub validation_json: Option<String>,
    pub approval_required: bool,
    pub approval_json: Option<String>,
    pub safety_critical: bool,
    pub backend: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SuggestionRow {
    pub fn from_suggestion(s: &Suggestion) -> Result<Self, StoreError> {
        Ok(Self {
            id: *s.id.as_uuid(),
            context_id: *s.context_id.as_uuid(),
            connection_id: *s.connection_id.as_uuid(),
            batch_id: s.batch_id.map(Uuid::from),
            title: s.title.clone(),
            config_json: serde_json::to_string(&s.config)?,
            confidence: s.confidence,
            valid: s.is_valid(),
            validation_json: s.validation.as_ref().map(serde_json::to_string).transpose()?,
            approval_required: s.approval_required(),
            approval_json: s.approval.as_ref().map(serde_json::to_string).transpose()?,
            safety_critical: s.safety_critical,
            backend: s.backend.clone(),
            status: s.status().as_str().to_string(),
            created_at: s.created_at,
            updated_at: s.updated_at,
        })
    }

    pub fn into_suggestion(self) -> Result<Suggestion, StoreError> {
        let status: SuggestionStatus = self.status.parse()?;
        let config = serde_json::from_str(&self.config_json)?;

        let mut s = Suggestion::new(
            ContextId::from_uuid(self.context_id),
            ConnectionId::from_uuid(self.connection_id),
            self.title,
            config,
            self.backend,
        )
        .restore(status);
        s.id = SuggestionId::from_uuid(self.id);
        s.batch_id = self.batch_id.map(BatchId::from_uuid);
        s.confidence = self.confidence;
        s.validation = self.validation_json.as_deref().map(serde_json::from_str).transpose()?;
        s.approval = self.approval_json.as_deref().map(serde_json::from_str).transpose()?;
        s.safety_critical = self.safety_critical;
        s.created_at = self.created_at;
        s.updated_at = self.updated_at;
        Ok(s)
    }
}

pub trait SuggestionStore: Send + Sync {
    fn insert(&self, suggestion: &Suggestion) -> Result<(), StoreError>;

    fn get(&self, id: SuggestionId) -> Result<Option<Suggestion>, StoreError>;

    fn list_by_status(&self, status: SuggestionStatus) -> Result<Vec<Suggestion>, StoreError>;

    fn list_for_batch(&self, batch_id: BatchId) -> Result<Vec<Suggestion>, StoreError>;

    fn list_for_connection(&self, connection_id: ConnectionId) -> Result<Vec<Suggestion>, StoreError>;

    /// Approve a pending, valid suggestion.
    fn approve(&self, id: SuggestionId) -> Result<Suggestion, StoreError>;

    fn reject(&self, id: SuggestionId) -> Result<Suggestion, StoreError>;

    /// Expire every pending suggestion created before `cutoff`. Returns how
    /// many were expired.
    fn expire_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;
}

#[derive(Debug, Default)]
pub struct InMemorySuggestionStore {
    rows: RwLock<HashMap<Uuid, SuggestionRow>>,
}

impl InMemorySuggestionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn select<F>(&self, pred: F) -> Result<Vec<Suggestion>, StoreError>
    where
        F: Fn(&SuggestionRow) -> bool,
    {
        let rows = self.rows.read().map_err(|_| StoreError::Poisoned)?;
        let mut out = rows
            .values()
            .filter(|r| pred(r))
            .cloned()
            .map(SuggestionRow::into_suggestion)
            .collect::<Result<Vec<_>, _>>()?;
        out.sort_by_key(|s| (s.created_at, s.id));
        Ok(out)
    }

    fn transition<F>(&self, id: SuggestionId, apply: F) -> Result<Suggestion, StoreError>
    where
        F: FnOnce(&mut Suggestion) -> Result<(), homeflow_core::DomainError>,
    {
        let mut rows = self.rows.write().map_err(|_| StoreError::Poisoned)?;
        let row = rows
            .get(id.as_uuid())
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let mut suggestion = row.into_suggestion()?;
        apply(&mut suggestion)?;
        rows.insert(*id.as_uuid(), SuggestionRow::from_suggestion(&suggestion)?);
        Ok(suggestion)
    }
}

impl SuggestionStore for InMemorySuggestionStore {
    fn insert(&self, suggestion: &Suggestion) -> Result<(), StoreError> {
        let row = SuggestionRow::from_suggestion(suggestion)?;
        let mut rows = self.rows.write().map_err(|_| StoreError::Poisoned)?;
        if rows.contains_key(&row.id) {
            return Err(StoreError::AlreadyExists(row.id.to_string()));
        }
        rows.insert(row.id, row);
        Ok(())
    }

    fn get(&self, id: SuggestionId) -> Result<Option<Suggestion>, StoreError> {
        let rows = self.rows.read().map_err(|_| StoreError::Poisoned)?;
        rows.get(id.as_uuid())
            .cloned()
            .map(SuggestionRow::into_suggestion)
            .transpose()
    }

    fn list_by_status(&self, status: SuggestionStatus) -> Result<Vec<Suggestion>, StoreError> {
        self.select(|r| r.status == status.as_str())
    }

    fn list_for_batch(&self, batch_id: BatchId) -> Result<Vec<Suggestion>, StoreError> {
        self.select(|r| r.batch_id == Some(*batch_id.as_uuid()))
    }

    fn list_for_connection(&self, connection_id: ConnectionId) -> Result<Vec<Suggestion>, StoreError> {
        self.select(|r| r.connection_id == *connection_id.as_uuid())
    }

    fn approve(&self, id: SuggestionId) -> Result<Suggestion, StoreError> {
        self.transition(id, Suggestion::approve)
    }

    fn reject(&self, id: SuggestionId) -> Result<Suggestion, StoreError> {
        self.transition(id, Suggestion::reject)
    }

    fn expire_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut rows = self.rows.write().map_err(|_| StoreError::Poisoned)?;
        let pending = SuggestionStatus::Pending.as_str();
        let mut expired = 0;
        for row in rows.values_mut() {
            if row.status != pending || row.created_at >= cutoff {
                continue;
            }
            let mut s = row.clone().into_suggestion()?;
            s.expire()?;
            *row = SuggestionRow::from_suggestion(&s)?;
            expired += 1;
        }
        Ok(expired)
    }
}

//! Storage adapters for batch audit records, suggestions, connections, and
//! owner safety limits.
//!
//! Only in-memory implementations live here; durable backends implement the
//! same traits.

mod batch;
mod connection;
mod safety;
mod suggestion;

use thiserror::Error;

use homeflow_core::DomainError;

pub use batch::{BatchStore, InMemoryBatchStore};
pub use connection::{ConnectionDirectory, InMemoryConnectionDirectory};
pub use safety::InMemorySafetyLimitStore;
pub use suggestion::{InMemorySuggestionStore, SuggestionRow, SuggestionStore};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("store lock poisoned")]
    Poisoned,

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

//! `homeflow-core`: shared building blocks for the event pipeline and the
//! suggestion batch process.
//!
//! This crate contains **pure** primitives (no IO, no async).

pub mod entity;
pub mod error;
pub mod glob;
pub mod id;
pub mod time;

pub use entity::EntityId;
pub use error::{DomainError, DomainResult};
pub use glob::Glob;
pub use id::{BatchId, ConnectionId, ContextId, EventId, SuggestionId};
pub use time::TimeRange;

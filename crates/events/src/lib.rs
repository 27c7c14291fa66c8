//! `homeflow-events`
//!
//! Hub state-change events, the ingestion-path filter engine, and the
//! partitioned broker abstraction that kept events are streamed to.
//!
//! Everything here is synchronous and IO-free; transports live in
//! `homeflow-infra`.

pub mod bus;
pub mod decision;
pub mod envelope;
pub mod event;
pub mod filter;
pub mod in_memory_bus;

pub use bus::{EventBus, PublishError, Subscription, partition_for};
pub use decision::FilterDecision;
pub use envelope::StreamRecord;
pub use event::{Event, IngestError};
pub use filter::{
    FilterConfig, FilterEngine, FilterRule, FilterStats, RuleError, RuleOutcome, UserRule,
    UserRuleAction,
};
pub use in_memory_bus::InMemoryPartitionedBus;

//! Broker-backed implementations of the `homeflow-events` bus abstraction.
//!
//! The in-memory partitioned bus lives in `homeflow-events`; this module adds
//! transports that need a network client.

#[cfg(feature = "redis")]
pub mod redis_streams;

#[cfg(feature = "redis")]
pub use redis_streams::{RedisDeadLetterSink, RedisStreamsBroker, RedisStreamsError};

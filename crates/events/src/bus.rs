//! Partitioned broker abstraction (mechanics only).
//!
//! Kept events are published to a topic split into a fixed number of
//! partitions. The message key (the entity id) selects the partition, so all
//! messages for one entity land on one partition in publish order.
//!
//! ## Delivery
//!
//! Publishers retry transient failures, so delivery is **at-least-once**:
//! consumers may observe duplicates and must be idempotent. Exactly-once is
//! not offered.

use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::Duration;

use thiserror::Error;

/// A subscription to one partition of a bus.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, std::sync::mpsc::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, std::sync::mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, std::sync::mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

/// Broker publish failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// Broker unavailable, timeout, connection reset. Worth retrying.
    #[error("transient broker failure: {0}")]
    Transient(String),

    /// The broker refused the message (too large, bad topic, ...). Retrying
    /// will not help.
    #[error("message rejected by broker: {0}")]
    Rejected(String),
}

impl PublishError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::Rejected(msg.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, PublishError::Transient(_))
    }
}

/// Keyed, partitioned publish abstraction.
///
/// Implementations must route a key to `partition_for(key, self.partitions())`
/// so that per-key ordering holds regardless of transport.
///
/// The trait requires `Send + Sync`; publisher workers share one bus.
pub trait EventBus<M>: Send + Sync {
    /// Number of partitions in the topic (always >= 1).
    fn partitions(&self) -> u32;

    fn publish(&self, key: &str, message: M) -> Result<(), PublishError>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    fn partitions(&self) -> u32 {
        (**self).partitions()
    }

    fn publish(&self, key: &str, message: M) -> Result<(), PublishError> {
        (**self).publish(key, message)
    }
}

/// Stable key → partition mapping (32-bit FNV-1a).
///
/// Stable across processes and releases, unlike `std`'s `DefaultHasher`.
pub fn partition_for(key: &str, partitions: u32) -> u32 {
    const OFFSET: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;

    let partitions = partitions.max(1);
    let hash = key
        .bytes()
        .fold(OFFSET, |h, b| (h ^ u32::from(b)).wrapping_mul(PRIME));
    hash % partitions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_is_stable_and_in_range() {
        let p = partition_for("light.kitchen", 12);
        assert!(p < 12);
        assert_eq!(p, partition_for("light.kitchen", 12));
        assert_eq!(partition_for("anything", 0), 0);
        assert_eq!(partition_for("anything", 1), 0);
    }

    #[test]
    fn fnv1a_reference_value() {
        // FNV-1a("a") = 0xe40c292c
        assert_eq!(partition_for("a", u32::MAX), 0xe40c_292c % u32::MAX);
    }

    #[test]
    fn keys_spread_over_partitions() {
        let mut seen = std::collections::HashSet::new();
        for i in 0..200 {
            seen.insert(partition_for(&format!("sensor.s{i}"), 8));
        }
        assert_eq!(seen.len(), 8);
    }
}

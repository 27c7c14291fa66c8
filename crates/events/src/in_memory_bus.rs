//! In-memory partitioned bus for tests/dev.

use std::sync::{Mutex, mpsc};

use crate::bus::{EventBus, PublishError, Subscription, partition_for};

#[derive(Debug)]
struct Partition<M> {
    log: Vec<(String, M)>,
    subscribers: Vec<mpsc::Sender<M>>,
}

impl<M> Default for Partition<M> {
    fn default() -> Self {
        Self {
            log: Vec::new(),
            subscribers: Vec::new(),
        }
    }
}

/// In-memory partitioned topic.
///
/// - No IO / no async
/// - Keeps the full log per partition (inspectable in tests)
/// - Fans out each message to the partition's live subscribers
#[derive(Debug)]
pub struct InMemoryPartitionedBus<M> {
    partitions: Vec<Mutex<Partition<M>>>,
}

impl<M> InMemoryPartitionedBus<M> {
    pub fn new(partitions: u32) -> Self {
        let n = partitions.max(1) as usize;
        Self {
            partitions: (0..n).map(|_| Mutex::new(Partition::default())).collect(),
        }
    }

    /// Total messages across all partitions.
    pub fn len(&self) -> usize {
        self.partitions
            .iter()
            .map(|p| p.lock().map(|p| p.log.len()).unwrap_or(0))
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<M: Clone> InMemoryPartitionedBus<M> {
    /// Snapshot of one partition's log, in publish order.
    pub fn records(&self, partition: u32) -> Vec<(String, M)> {
        self.partitions
            .get(partition as usize)
            .and_then(|p| p.lock().ok().map(|p| p.log.clone()))
            .unwrap_or_default()
    }

    /// Snapshot of every message published under `key`, in publish order.
    pub fn records_for_key(&self, key: &str) -> Vec<M> {
        let partition = partition_for(key, self.partitions.len() as u32);
        self.records(partition)
            .into_iter()
            .filter(|(k, _)| k == key)
            .map(|(_, m)| m)
            .collect()
    }

    /// Subscribe to messages published to `partition` from now on.
    pub fn subscribe(&self, partition: u32) -> Subscription<M> {
        let (tx, rx) = mpsc::channel();
        if let Some(Ok(mut p)) = self.partitions.get(partition as usize).map(|p| p.lock()) {
            p.subscribers.push(tx);
        }
        Subscription::new(rx)
    }
}

impl<M> Default for InMemoryPartitionedBus<M> {
    fn default() -> Self {
        Self::new(1)
    }
}

impl<M> EventBus<M> for InMemoryPartitionedBus<M>
where
    M: Clone + Send + 'static,
{
    fn partitions(&self) -> u32 {
        self.partitions.len() as u32
    }

    fn publish(&self, key: &str, message: M) -> Result<(), PublishError> {
        let idx = partition_for(key, self.partitions()) as usize;
        let mut partition = self.partitions[idx]
            .lock()
            .map_err(|_| PublishError::transient("partition lock poisoned"))?;

        // Drop any dead subscribers while publishing.
        partition.subscribers.retain(|tx| tx.send(message.clone()).is_ok());
        partition.log.push((key.to_string(), message));

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn same_key_lands_on_same_partition_in_order() {
        let bus = InMemoryPartitionedBus::<u32>::new(4);
        for i in 0..10 {
            bus.publish("light.kitchen", i).unwrap();
            bus.publish("light.hall", 100 + i).unwrap();
        }

        assert_eq!(bus.records_for_key("light.kitchen"), (0..10).collect::<Vec<_>>());
        assert_eq!(bus.records_for_key("light.hall"), (100..110).collect::<Vec<_>>());
        assert_eq!(bus.len(), 20);
    }

    #[test]
    fn subscribers_receive_partition_messages() {
        let bus = InMemoryPartitionedBus::<String>::new(3);
        let p = partition_for("lock.front", 3);
        let sub = bus.subscribe(p);

        bus.publish("lock.front", "locked".to_string()).unwrap();

        assert_eq!(
            sub.recv_timeout(Duration::from_millis(100)).unwrap(),
            "locked".to_string()
        );
    }
}

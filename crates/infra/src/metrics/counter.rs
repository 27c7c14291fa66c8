//! Sharded monotonic counters.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

static NEXT_SHARD: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static THREAD_SHARD: usize = NEXT_SHARD.fetch_add(1, Ordering::Relaxed);
}

/// A counter split across shards so concurrent writers rarely touch the same
/// cache line. Each thread always hits the same shard, which keeps paired
/// counters (total, kept) ordered per shard.
#[derive(Debug)]
pub struct ShardedCounter {
    shards: Box<[AtomicU64]>,
}

impl ShardedCounter {
    pub fn new(shards: usize) -> Self {
        Self {
            shards: (0..shards.max(1)).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    fn shard(&self) -> &AtomicU64 {
        let idx = THREAD_SHARD.with(|s| *s) % self.shards.len();
        &self.shards[idx]
    }

    pub fn add(&self, n: u64) {
        self.shard().fetch_add(n, Ordering::SeqCst);
    }

    pub fn incr(&self) {
        self.add(1);
    }

    /// Merge all shards.
    pub fn sum(&self) -> u64 {
        self.shards
            .iter()
            .map(|s| s.load(Ordering::SeqCst))
            .fold(0u64, u64::wrapping_add)
    }

    /// Read and zero every shard.
    pub fn take(&self) -> u64 {
        self.shards
            .iter()
            .map(|s| s.swap(0, Ordering::SeqCst))
            .fold(0u64, u64::wrapping_add)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn concurrent_increments_are_not_lost() {
        let counter = Arc::new(ShardedCounter::new(4));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let c = counter.clone();
                thread::spawn(move || {
                    for _ in 0..10_000 {
                        c.incr();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(counter.sum(), 80_000);
        assert_eq!(counter.take(), 80_000);
        assert_eq!(counter.sum(), 0);
    }
}

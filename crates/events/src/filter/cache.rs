//! Bounded per-entity recent-state cache used by the frequency and noise rules.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};

use homeflow_core::EntityId;

/// What the filter last let through for one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRecord {
    /// Start of the current cooldown window.
    pub window_start: DateTime<Utc>,
    pub last_kept_at: DateTime<Utc>,
    pub last_state: Option<String>,
    /// Events kept since `window_start`.
    pub kept_in_window: u32,
}

/// Per-entity cache with oldest-first eviction once `capacity` is reached.
///
/// Eviction order is tracked with a generation queue; superseded queue
/// entries are skipped lazily and the queue is compacted when it grows past
/// twice the capacity.
#[derive(Debug)]
pub struct RecentStateCache {
    capacity: usize,
    entries: HashMap<EntityId, (EntityRecord, u64)>,
    order: VecDeque<(EntityId, u64)>,
    generation: u64,
}

impl RecentStateCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            order: VecDeque::new(),
            generation: 0,
        }
    }

    pub fn get(&self, entity: &EntityId) -> Option<&EntityRecord> {
        self.entries.get(entity).map(|(r, _)| r)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    /// Record that an event for `entity` was kept at `at`.
    ///
    /// Opens a new cooldown window when none is open or the open one has
    /// elapsed.
    pub fn record_kept(
        &mut self,
        entity: &EntityId,
        at: DateTime<Utc>,
        state: Option<&str>,
        cooldown: Duration,
    ) {
        self.generation += 1;
        let generation = self.generation;

        let record = match self.entries.get(entity) {
            Some((prev, _)) if at - prev.window_start < cooldown && at >= prev.window_start => {
                EntityRecord {
                    window_start: prev.window_start,
                    last_kept_at: at,
                    last_state: state.map(str::to_string),
                    kept_in_window: prev.kept_in_window.saturating_add(1),
                }
            }
            _ => EntityRecord {
                window_start: at,
                last_kept_at: at,
                last_state: state.map(str::to_string),
                kept_in_window: 1,
            },
        };

        self.entries.insert(entity.clone(), (record, generation));
        self.order.push_back((entity.clone(), generation));

        while self.entries.len() > self.capacity {
            self.evict_oldest();
        }

        if self.order.len() > self.capacity * 2 {
            self.compact();
        }
    }

    fn evict_oldest(&mut self) {
        while let Some((entity, generation)) = self.order.pop_front() {
            let current = self.entries.get(&entity).map(|(_, g)| *g);
            if current == Some(generation) {
                self.entries.remove(&entity);
                return;
            }
        }
    }

    fn compact(&mut self) {
        let entries = &self.entries;
        self.order
            .retain(|(entity, generation)| entries.get(entity).map(|(_, g)| g) == Some(generation));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(1_700_000_000_000 + ms).unwrap()
    }

    #[test]
    fn window_accumulates_within_cooldown() {
        let mut cache = RecentStateCache::new(10);
        let e = EntityId::new("light.a");
        let cd = Duration::milliseconds(1000);

        cache.record_kept(&e, at(0), Some("on"), cd);
        cache.record_kept(&e, at(500), Some("off"), cd);
        let r = cache.get(&e).unwrap();
        assert_eq!(r.kept_in_window, 2);
        assert_eq!(r.window_start, at(0));
        assert_eq!(r.last_state.as_deref(), Some("off"));

        cache.record_kept(&e, at(1500), Some("on"), cd);
        let r = cache.get(&e).unwrap();
        assert_eq!(r.kept_in_window, 1);
        assert_eq!(r.window_start, at(1500));
    }

    #[test]
    fn evicts_least_recently_kept() {
        let mut cache = RecentStateCache::new(2);
        let cd = Duration::milliseconds(1000);
        let a = EntityId::new("light.a");
        let b = EntityId::new("light.b");
        let c = EntityId::new("light.c");

        cache.record_kept(&a, at(0), None, cd);
        cache.record_kept(&b, at(1), None, cd);
        // Touch `a` again so `b` becomes the oldest.
        cache.record_kept(&a, at(2), None, cd);
        cache.record_kept(&c, at(3), None, cd);

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&a).is_some());
        assert!(cache.get(&b).is_none());
        assert!(cache.get(&c).is_some());
    }

    #[test]
    fn order_queue_stays_bounded() {
        let mut cache = RecentStateCache::new(4);
        let e = EntityId::new("sensor.t");
        for i in 0..1000 {
            cache.record_kept(&e, at(i), None, Duration::milliseconds(1));
        }
        assert_eq!(cache.len(), 1);
        assert!(cache.order.len() <= 8);
    }
}

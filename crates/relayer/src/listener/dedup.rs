//! Bounded set of recently ingested event ids.

use meshbridge_core::EventId;
use std::collections::{HashSet, VecDeque};

/// Fast-path filter in front of the queue's unique-key insert.
///
/// Holds at most `capacity` ids. Inserting past the bound evicts the oldest half.
#[derive(Debug)]
pub struct RecentEvents {
    capacity: usize,
    ids: HashSet<EventId>,
    order: VecDeque<EventId>,
}

impl RecentEvents {
    /// Create an empty set.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            ids: HashSet::with_capacity(capacity + 1),
            order: VecDeque::with_capacity(capacity + 1),
        }
    }

    /// Whether `id` was recorded and not yet evicted.
    pub fn contains(&self, id: &EventId) -> bool {
        self.ids.contains(id)
    }

    /// Record `id` as durably ingested.
    pub fn insert(&mut self, id: EventId) {
        if !self.ids.insert(id.clone()) {
            return;
        }
        self.order.push_back(id);

        if self.order.len() > self.capacity {
            let evict = (self.capacity / 2).max(1);
            for old in self.order.drain(..evict) {
                self.ids.remove(&old);
            }
        }
    }

    /// Number of ids held.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: usize) -> EventId {
        EventId::from_raw(format!("0x{n:02x}-0"))
    }

    #[test]
    fn test_insert_and_contains() {
        let mut seen = RecentEvents::new(10);
        seen.insert(id(1));
        seen.insert(id(1));
        assert!(seen.contains(&id(1)));
        assert!(!seen.contains(&id(2)));
        assert_eq!(seen.len(), 1);
    }

    #[test]
    fn test_evicts_oldest_half_past_capacity() {
        let mut seen = RecentEvents::new(10);
        for n in 0..10 {
            seen.insert(id(n));
        }
        assert_eq!(seen.len(), 10);

        seen.insert(id(10));
        assert_eq!(seen.len(), 6);
        for n in 0..5 {
            assert!(!seen.contains(&id(n)));
        }
        for n in 5..=10 {
            assert!(seen.contains(&id(n)));
        }
    }
}

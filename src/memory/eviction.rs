use std::collections::VecDeque;

use crate::key::CacheKey;

/// Recency order of one function's keys, least recently used first.
#[derive(Debug, Clone)]
pub struct AccessOrder {
    capacity: usize,
    order: VecDeque<CacheKey>,
}

impl AccessOrder {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Moves `key` to the most recently used position.
    pub fn touch(&mut self, key: &CacheKey) {
        if let Some(position) = self.order.iter().position(|k| k == key) {
            self.order.remove(position);
        }
        self.order.push_back(key.clone());
    }

    /// Removes and returns the least recently used key when the order is over
    /// capacity. A `protected` victim stays put and the order overshoots.
    pub fn pop_victim_unless(&mut self, protected: impl Fn(&CacheKey) -> bool) -> Option<CacheKey> {
        let victim = self.order.front()?;
        if self.order.len() <= self.capacity || protected(victim) {
            return None;
        }
        self.order.pop_front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CacheKey> {
        self.order.iter()
    }
}

impl Default for AccessOrder {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_CAPACITY)
    }
}

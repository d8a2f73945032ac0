use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

/// Capacity-bounded map that evicts the least recently used entry on insert.
///
/// Recency is a monotonically increasing tick per access; `order` maps ticks
/// back to keys so the oldest entry is the first one in the tree.
#[derive(Debug)]
pub struct LruMap<K, V> {
    capacity: usize,
    tick: u64,
    entries: HashMap<K, (V, u64)>,
    order: BTreeMap<u64, K>,
}

impl<K, V> LruMap<K, V>
where
    K: Eq + Hash + Clone,
{
    /// A capacity of 0 is treated as 1.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            tick: 0,
            entries: HashMap::new(),
            order: BTreeMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Looks up an entry and marks it most recently used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let tick = self.next_tick();
        let (value, last_used) = self.entries.get_mut(key)?;
        self.order.remove(last_used);
        self.order.insert(tick, key.clone());
        *last_used = tick;
        Some(value)
    }

    /// Inserts or replaces an entry. Returns the evicted entry, if the map was
    /// full.
    pub fn put(&mut self, key: K, value: V) -> Option<(K, V)> {
        let tick = self.next_tick();
        if let Some((_, last_used)) = self.entries.remove(&key) {
            self.order.remove(&last_used);
        }

        let evicted = if self.entries.len() >= self.capacity {
            self.pop_oldest()
        } else {
            None
        };
        self.order.insert(tick, key.clone());
        self.entries.insert(key, (value, tick));
        evicted
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let (value, last_used) = self.entries.remove(key)?;
        self.order.remove(&last_used);
        Some(value)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    fn pop_oldest(&mut self) -> Option<(K, V)> {
        let (_, key) = self.order.pop_first()?;
        let (value, _) = self.entries.remove(&key)?;
        Some((key, value))
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_least_recently_used() {
        let mut map = LruMap::new(2);
        map.put(1, "a");
        map.put(2, "b");
        assert_eq!(map.get(&1), Some(&"a"));

        let evicted = map.put(3, "c");
        assert_eq!(evicted, Some((2, "b")));
        assert!(map.contains_key(&1));
        assert!(map.contains_key(&3));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn replacing_does_not_evict() {
        let mut map = LruMap::new(2);
        map.put(1, "a");
        map.put(2, "b");
        assert_eq!(map.put(1, "a2"), None);
        assert_eq!(map.get(&1), Some(&"a2"));
        assert_eq!(map.remove(&2), Some("b"));
        assert_eq!(map.remove(&2), None);
        assert_eq!(map.len(), 1);
    }
}

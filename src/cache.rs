use std::collections::HashMap;

use crate::normalize::{CacheKey, ZipCode};

/// Outcome remembered for a key. `None` records a lookup that found nothing.
pub type CacheEntry = Option<ZipCode>;

/// Session-scoped memo of resolved lookups, unbounded and never evicted.
#[derive(Debug, Default)]
pub struct GeocodeCache {
    entries: HashMap<CacheKey, CacheEntry>,
}

impl GeocodeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Outer `None` means the key was never looked up.
    pub fn get(&self, key: &CacheKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Last write wins; rewriting a key is not an error.
    pub fn put(&mut self, key: CacheKey, entry: CacheEntry) {
        self.entries.insert(key, entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remembers_negative_results() {
        let mut cache = GeocodeCache::new();
        let key = CacheKey::new("1 Nowhere Ln", "Ghost Town", "NV");
        assert!(cache.get(&key).is_none());

        cache.put(key.clone(), None);
        assert_eq!(cache.get(&key), Some(&None));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn equivalent_spellings_hit_the_same_entry() {
        let mut cache = GeocodeCache::new();
        let zip = ZipCode::parse("62701");
        cache.put(CacheKey::new("123 Main St Apt 4B", "Springfield", "IL"), zip.clone());

        let lookup = CacheKey::new("123 MAIN ST UNIT 4B", "springfield", "il");
        assert_eq!(cache.get(&lookup), Some(&zip));
    }

    #[test]
    fn rewriting_a_key_keeps_the_latest_value() {
        let mut cache = GeocodeCache::new();
        let key = CacheKey::new("5 Pine Ct", "Dover", "DE");
        cache.put(key.clone(), None);
        cache.put(key.clone(), ZipCode::parse("19901"));
        assert_eq!(cache.get(&key), Some(&ZipCode::parse("19901")));
        assert_eq!(cache.len(), 1);
        assert!(!cache.is_empty());
    }
}

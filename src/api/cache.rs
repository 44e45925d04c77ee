//! An in-process TTL cache over `/holders` and `/stats` responses.
//!
//! A `Mutex<HashMap>` keyed by an endpoint-and-filter string, capped at 100 entries with a 30 s
//! per-entry TTL. No extra crate needed for something this small.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::Value;

const TTL: Duration = Duration::from_secs(30);
const MAX_ENTRIES: usize = 100;

pub struct ResponseCache {
    entries: Mutex<HashMap<String, (Instant, Value)>>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let entries = self.entries.lock().unwrap();
        entries
            .get(key)
            .filter(|(inserted_at, _)| inserted_at.elapsed() < TTL)
            .map(|(_, value)| value.clone())
    }

    pub fn put(&self, key: String, value: Value) {
        let mut entries = self.entries.lock().unwrap();
        if entries.len() >= MAX_ENTRIES && !entries.contains_key(&key) {
            // Simplest eviction: drop one arbitrary entry. The TTL keeps this cache small in
            // practice (at most one entry per chain per cached endpoint).
            if let Some(evict_key) = entries.keys().next().cloned() {
                entries.remove(&evict_key);
            }
        }
        entries.insert(key, (Instant::now(), value));
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn put_then_get_returns_the_cached_value() {
        let cache = ResponseCache::new();
        cache.put("holders_all".to_string(), json!({"a": 1}));
        assert_eq!(cache.get("holders_all"), Some(json!({"a": 1})));
    }

    #[test]
    fn missing_key_returns_none() {
        let cache = ResponseCache::new();
        assert_eq!(cache.get("missing"), None);
    }
}

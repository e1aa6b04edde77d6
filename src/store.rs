//! Injectable sample storage
//!
//! Simulation runs are expensive, so callers can hand any engine output to a
//! [`SampleStore`] and fetch it back later (for re-summarizing under a
//! different booked figure, say) without re-running the draws. The trait is
//! the seam; production code and tests both use the in-memory backend, a
//! remote-backed one can be dropped in without touching the engines.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// One stored simulation run: the draws plus enough metadata to reproduce
/// and label them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleRecord {
    /// Engine label, e.g. "residual_bootstrap".
    pub engine: String,

    /// Seed the run was keyed on.
    pub seed: u64,

    /// The simulated totals, one per draw.
    pub samples: Vec<f64>,
}

/// Keyed storage for simulation output.
///
/// `put` replaces any existing record under the same key; `get` clones the
/// record out so callers never hold a lock across summarization.
pub trait SampleStore: Send + Sync {
    fn put(&self, key: &str, record: SampleRecord);
    fn get(&self, key: &str) -> Option<SampleRecord>;
}

/// Mutex-protected hash map backend with hit/miss counters.
#[derive(Debug, Default)]
pub struct InMemorySampleStore {
    entries: Mutex<HashMap<String, SampleRecord>>,
    hits: Mutex<u64>,
    misses: Mutex<u64>,
}

impl InMemorySampleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fraction of `get` calls that found a record.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.lock().map(|h| *h).unwrap_or(0);
        let misses = self.misses.lock().map(|m| *m).unwrap_or(0);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Drop all records and reset the counters.
    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
        if let Ok(mut h) = self.hits.lock() {
            *h = 0;
        }
        if let Ok(mut m) = self.misses.lock() {
            *m = 0;
        }
    }
}

impl SampleStore for InMemorySampleStore {
    fn put(&self, key: &str, record: SampleRecord) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.to_string(), record);
        }
    }

    fn get(&self, key: &str) -> Option<SampleRecord> {
        let found = self
            .entries
            .lock()
            .ok()
            .and_then(|e| e.get(key).cloned());
        match (&found, self.hits.lock(), self.misses.lock()) {
            (Some(_), Ok(mut h), _) => *h += 1,
            (None, _, Ok(mut m)) => *m += 1,
            _ => {}
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(samples: Vec<f64>) -> SampleRecord {
        SampleRecord {
            engine: "residual_bootstrap".to_string(),
            seed: 42,
            samples,
        }
    }

    #[test]
    fn test_put_get_round_trip() {
        let store = InMemorySampleStore::new();
        store.put("block_a", record(vec![1.0, 2.0, 3.0]));

        let fetched = store.get("block_a").unwrap();
        assert_eq!(fetched.samples, vec![1.0, 2.0, 3.0]);
        assert_eq!(fetched.seed, 42);
        assert!(store.get("block_b").is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_put_replaces_existing_record() {
        let store = InMemorySampleStore::new();
        store.put("k", record(vec![1.0]));
        store.put("k", record(vec![9.0, 8.0]));
        assert_eq!(store.get("k").unwrap().samples, vec![9.0, 8.0]);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_hit_rate_tracks_lookups() {
        let store = InMemorySampleStore::new();
        store.put("k", record(vec![1.0]));
        store.get("k");
        store.get("missing");
        assert!((store.hit_rate() - 0.5).abs() < 1e-12);

        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.hit_rate(), 0.0);
    }

    #[test]
    fn test_usable_through_trait_object() {
        let store: Box<dyn SampleStore> = Box::new(InMemorySampleStore::new());
        store.put("k", record(vec![4.0]));
        assert_eq!(store.get("k").unwrap().samples, vec![4.0]);
    }
}

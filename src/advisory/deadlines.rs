use std::collections::HashMap;
use std::hash::Hash;
use tokio::time::Instant;

/// Cancellable one-shot timers keyed by `K`. Polled, not spawned.
#[derive(Debug)]
pub struct Deadlines<K> {
    entries: HashMap<K, Instant>,
}

impl<K> Default for Deadlines<K> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<K: Copy + Eq + Hash + Ord> Deadlines<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms or re-arms the timer for `key`.
    pub fn arm(&mut self, key: K, at: Instant) {
        self.entries.insert(key, at);
    }

    pub fn cancel(&mut self, key: &K) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Removes and returns every key due at `now`, earliest first.
    pub fn due(&mut self, now: Instant) -> Vec<K> {
        let mut fired: Vec<(Instant, K)> = self
            .entries
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(key, at)| (*at, *key))
            .collect();
        fired.sort();
        for (_, key) in &fired {
            self.entries.remove(key);
        }
        fired.into_iter().map(|(_, key)| key).collect()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.values().min().copied()
    }
}

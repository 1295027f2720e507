use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::Hash;

/// Monotonic request identifier shared with the analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

/// Latest-wins bookkeeping: at most one live request per key.
///
/// Issuing for a key retires whatever was outstanding for it, so a late reply
/// to the retired id no longer resolves.
#[derive(Debug)]
pub struct SingleFlight<K> {
    last_issued: u64,
    latest: HashMap<K, RequestId>,
    owners: HashMap<RequestId, K>,
}

impl<K> Default for SingleFlight<K> {
    fn default() -> Self {
        Self {
            last_issued: 0,
            latest: HashMap::new(),
            owners: HashMap::new(),
        }
    }
}

impl<K: Copy + Eq + Hash> SingleFlight<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&mut self, key: K) -> RequestId {
        self.last_issued += 1;
        let id = RequestId(self.last_issued);
        if let Some(retired) = self.latest.insert(key, id) {
            self.owners.remove(&retired);
        }
        self.owners.insert(id, key);
        id
    }

    pub fn is_current(&self, id: RequestId) -> bool {
        self.owners.contains_key(&id)
    }

    pub fn outstanding(&self, key: &K) -> Option<RequestId> {
        self.latest.get(key).copied()
    }

    /// Consumes a reply id. Returns its key only if it is still the latest.
    pub fn settle(&mut self, id: RequestId) -> Option<K> {
        let key = self.owners.remove(&id)?;
        self.latest.remove(&key);
        Some(key)
    }

    /// Every live request id, oldest first.
    pub fn in_flight(&self) -> Vec<RequestId> {
        let mut ids: Vec<RequestId> = self.owners.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn cancel(&mut self, key: &K) -> Option<RequestId> {
        let id = self.latest.remove(key)?;
        self.owners.remove(&id);
        Some(id)
    }
}

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;
use std::sync::Mutex;

/// Insertion-ordered set that evicts its oldest entry once full.
///
/// Eviction follows admission order, lookups do not refresh an entry.
#[derive(Debug)]
pub struct BoundedSet<T> {
    capacity: usize,
    members: HashSet<T>,
    order: VecDeque<T>,
}

impl<T: Eq + Hash + Clone> BoundedSet<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            members: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    /// Returns false if `value` was already present
    pub fn insert(&mut self, value: T) -> bool {
        if self.members.contains(&value) {
            return false;
        }

        if self.members.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }

        self.order.push_back(value.clone());
        self.members.insert(value);
        true
    }

    pub fn remove(&mut self, value: &T) -> bool {
        if !self.members.remove(value) {
            return false;
        }
        if let Some(index) = self.order.iter().position(|v| v == value) {
            self.order.remove(index);
        }
        true
    }

    pub fn contains(&self, value: &T) -> bool {
        self.members.contains(value)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Seen-sets for block heights and (transaction hash, height) pairs.
///
/// Every admit is an atomic check-and-set under the set's mutex, so two
/// concurrent callers can never both win the same key.
#[derive(Debug)]
pub struct Deduplicator {
    heights: Mutex<BoundedSet<u64>>,
    transactions: Mutex<BoundedSet<(String, u64)>>,
}

impl Deduplicator {
    pub fn new(height_capacity: usize, tx_capacity: usize) -> Self {
        Self {
            heights: Mutex::new(BoundedSet::new(height_capacity)),
            transactions: Mutex::new(BoundedSet::new(tx_capacity)),
        }
    }

    pub fn admit_height(&self, height: u64) -> bool {
        self.heights.lock().unwrap_or_else(|e| e.into_inner()).insert(height)
    }

    /// Make a height eligible again after its fetch failed
    pub fn release_height(&self, height: u64) -> bool {
        self.heights.lock().unwrap_or_else(|e| e.into_inner()).remove(&height)
    }

    pub fn has_height(&self, height: u64) -> bool {
        self.heights.lock().unwrap_or_else(|e| e.into_inner()).contains(&height)
    }

    pub fn admit_tx(&self, hash: &str, height: u64) -> bool {
        self.transactions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((hash.to_lowercase(), height))
    }

    pub fn has_tx(&self, hash: &str, height: u64) -> bool {
        self.transactions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&(hash.to_lowercase(), height))
    }

    pub fn height_count(&self) -> usize {
        self.heights.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn tx_count(&self) -> usize {
        self.transactions.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

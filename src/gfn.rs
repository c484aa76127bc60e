//! Get-from-neighbor (GFN) filter.
//!
//! A counting-bloom set recording objects recently served from a peer while
//! rebalance is in flight. Joggers consult it to avoid re-migrating objects
//! a client already pulled. False positives are possible (and harmless - the
//! object is skipped once and caught by the next rebalance); false negatives
//! are not, until the entry is deleted.

use std::sync::atomic::{AtomicU8, Ordering};

const NUM_HASHES: usize = 4;

/// Counting bloom filter over object unames.
pub struct GfnFilter {
    counters: Vec<AtomicU8>,
}

impl GfnFilter {
    /// `capacity` is the expected number of live entries; the counter array
    /// is sized for a low false-positive rate at that load.
    pub fn new(capacity: usize) -> Self {
        let size = (capacity.max(64) * 10).next_power_of_two();
        Self {
            counters: (0..size).map(|_| AtomicU8::new(0)).collect(),
        }
    }

    fn indices(&self, key: &[u8]) -> [usize; NUM_HASHES] {
        let mask = self.counters.len() - 1;
        let mut out = [0usize; NUM_HASHES];
        for (i, slot) in out.iter_mut().enumerate() {
            let h = xxhash_rust::xxh3::xxh3_64_with_seed(key, i as u64);
            *slot = (h as usize) & mask;
        }
        out
    }

    pub fn insert(&self, key: &[u8]) {
        for idx in self.indices(key) {
            let _ = self.counters[idx].fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                if v == u8::MAX {
                    None
                } else {
                    Some(v + 1)
                }
            });
        }
    }

    pub fn lookup(&self, key: &[u8]) -> bool {
        self.indices(key)
            .iter()
            .all(|&idx| self.counters[idx].load(Ordering::Relaxed) > 0)
    }

    pub fn delete(&self, key: &[u8]) {
        for idx in self.indices(key) {
            let _ = self.counters[idx].fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                if v == 0 || v == u8::MAX {
                    None
                } else {
                    Some(v - 1)
                }
            });
        }
    }

    pub fn reset(&self) {
        for c in &self.counters {
            c.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_lookup_delete() {
        let f = GfnFilter::new(1000);
        assert!(!f.lookup(b"native/@/bck/obj1"));
        f.insert(b"native/@/bck/obj1");
        assert!(f.lookup(b"native/@/bck/obj1"));
        f.delete(b"native/@/bck/obj1");
        assert!(!f.lookup(b"native/@/bck/obj1"));
    }

    #[test]
    fn test_no_false_negatives() {
        let f = GfnFilter::new(1000);
        for i in 0..500 {
            f.insert(format!("native/@/bck/obj-{}", i).as_bytes());
        }
        for i in 0..500 {
            assert!(f.lookup(format!("native/@/bck/obj-{}", i).as_bytes()));
        }
    }

    #[test]
    fn test_reset() {
        let f = GfnFilter::new(100);
        for i in 0..50 {
            f.insert(format!("obj-{}", i).as_bytes());
        }
        f.reset();
        for i in 0..50 {
            assert!(!f.lookup(format!("obj-{}", i).as_bytes()));
        }
    }
}

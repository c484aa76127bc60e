//! Slice-arrival wait registry for EC rebalance.
//!
//! The fix-global phase schedules reconstruction in bounded batches; for
//! every expected slice it creates one waiter here and the receive path
//! flags arrivals. The registry keeps a single outstanding counter equal to
//! the number of unarrived slots, which the batch driver polls.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

/// What the waiter is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    /// A single data/parity slice.
    SingleSlice,
    /// A full replica.
    Replica,
}

/// One expected slice (or replica) of one object.
pub struct SliceWaiter {
    pub uid: String,
    pub slice_id: i16,
    pub mode: WaitMode,
    arrived: AtomicBool,
}

impl SliceWaiter {
    pub fn is_arrived(&self) -> bool {
        self.arrived.load(Ordering::Acquire)
    }
}

#[derive(Default)]
struct Inner {
    /// uid -> slice_id -> waiter
    objs: HashMap<String, HashMap<i16, Arc<SliceWaiter>>>,
}

/// Registry of slice waiters, keyed by object UID.
#[derive(Default)]
pub struct WaitRegistry {
    inner: Mutex<Inner>,
    outstanding: AtomicI64,
}

impl WaitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked objects.
    pub fn len(&self) -> usize {
        self.inner.lock().objs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Unarrived slots across the whole registry.
    pub fn outstanding(&self) -> i64 {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Get or create the waiter for `(uid, slice_id)`. Idempotent: the same
    /// pair always yields the same handle, and only creation bumps the
    /// outstanding counter.
    pub fn lookup_create(&self, uid: &str, slice_id: i16, mode: WaitMode) -> Arc<SliceWaiter> {
        let mut inner = self.inner.lock();
        let slots = inner.objs.entry(uid.to_string()).or_default();
        if let Some(w) = slots.get(&slice_id) {
            return Arc::clone(w);
        }
        let w = Arc::new(SliceWaiter {
            uid: uid.to_string(),
            slice_id,
            mode,
            arrived: AtomicBool::new(false),
        });
        slots.insert(slice_id, Arc::clone(&w));
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        w
    }

    /// Flag an arrival; decrements the outstanding counter exactly once per
    /// waiter.
    pub fn mark_arrived(&self, uid: &str, slice_id: i16) -> bool {
        let waiter = {
            let inner = self.inner.lock();
            inner
                .objs
                .get(uid)
                .and_then(|slots| slots.get(&slice_id))
                .cloned()
        };
        match waiter {
            Some(w)
                if w
                    .arrived
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok() =>
            {
                self.outstanding.fetch_sub(1, Ordering::AcqRel);
                true
            }
            _ => false,
        }
    }

    /// Drop the waiters of the first `limit` objects of `objs` (the batch
    /// just completed). A `limit` beyond the end of `objs` references no
    /// valid batch and is a no-op. Idempotent: re-dropping removed objects
    /// changes nothing.
    pub fn cleanup_batch(&self, objs: &[String], limit: usize) {
        if limit > objs.len() {
            return;
        }
        let mut inner = self.inner.lock();
        for uid in &objs[..limit] {
            if let Some(slots) = inner.objs.remove(uid) {
                let unarrived = slots.values().filter(|w| !w.is_arrived()).count() as i64;
                self.outstanding.fetch_sub(unarrived, Ordering::AcqRel);
            }
        }
    }

    /// Wipe everything and zero the outstanding counter.
    pub fn cleanup(&self) {
        let mut inner = self.inner.lock();
        inner.objs.clear();
        self.outstanding.store(0, Ordering::Release);
    }

    /// Invariant check: the counter equals the number of unarrived slots.
    #[cfg(test)]
    pub fn counter_consistent(&self) -> bool {
        let inner = self.inner.lock();
        let unarrived: i64 = inner
            .objs
            .values()
            .map(|slots| slots.values().filter(|w| !w.is_arrived()).count() as i64)
            .sum();
        unarrived == self.outstanding.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(registry: &WaitRegistry, objects: usize, slices: i16) -> Vec<String> {
        let uids: Vec<String> = (0..objects)
            .map(|i| format!("native/@/bck{}/obj{}", i % 3, i))
            .collect();
        for uid in &uids {
            for slice in 0..slices {
                registry.lookup_create(uid, slice, WaitMode::SingleSlice);
            }
        }
        uids
    }

    #[test]
    fn test_lookup_create_unique_then_idempotent() {
        let registry = WaitRegistry::new();
        let uids = seed(&registry, 14, 3);
        assert_eq!(registry.outstanding(), 42);
        assert_eq!(registry.len(), 14);

        // re-creating every pair returns the identical handles and leaves
        // the counter alone
        for uid in &uids {
            for slice in 0..3 {
                let a = registry.lookup_create(uid, slice, WaitMode::SingleSlice);
                let b = registry.lookup_create(uid, slice, WaitMode::SingleSlice);
                assert!(Arc::ptr_eq(&a, &b));
            }
        }
        assert_eq!(registry.outstanding(), 42);
        assert!(registry.counter_consistent());
    }

    #[test]
    fn test_batch_lifecycle() {
        let registry = WaitRegistry::new();
        let uids = seed(&registry, 14, 3);

        // two slices land
        assert!(registry.mark_arrived(&uids[0], 0));
        assert!(registry.mark_arrived(&uids[0], 1));
        // double arrival is a no-op
        assert!(!registry.mark_arrived(&uids[0], 1));
        assert_eq!(registry.outstanding(), 40);
        assert!(registry.counter_consistent());

        // out-of-range batch reference: no-op
        registry.cleanup_batch(&uids, uids.len() + 10);
        assert_eq!(registry.len(), 14);

        // drop the first 11 objects' waiters
        registry.cleanup_batch(&uids, 11);
        assert_eq!(registry.len(), 3);
        assert!(registry.counter_consistent());

        // idempotent on the same args
        registry.cleanup_batch(&uids, 11);
        assert_eq!(registry.len(), 3);
        assert!(registry.counter_consistent());

        // surviving objects still resolve to their original waiters
        let w = registry.lookup_create(&uids[13], 1, WaitMode::SingleSlice);
        assert!(!w.is_arrived());
        assert_eq!(registry.len(), 3);

        registry.cleanup();
        assert_eq!(registry.outstanding(), 0);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_unknown_arrival_ignored() {
        let registry = WaitRegistry::new();
        assert!(!registry.mark_arrived("native/@/b/never-created", 0));
        assert_eq!(registry.outstanding(), 0);
    }
}

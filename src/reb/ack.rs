//! Pending-ack bookkeeping on the sender side.
//!
//! An entry is inserted (optimistically) before the object frame is handed
//! to the transport and deleted when the destination's ack echo arrives.
//! The wait-ack stage sweeps leftovers: entries whose HRW owner is
//! unchanged are retransmitted, entries whose owner moved are dropped.
//!
//! The tables are sharded by uname hash to keep send-path contention low.

use crate::cluster::{hrw_target, Smap};
use crate::error::Result;
use crate::lom::Lom;
use crate::types::{NodeId, RebId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;

pub const ACK_SHARDS: usize = 16;

/// Ack token carried in the frame's opaque bytes and echoed back verbatim
/// by the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegularAck {
    pub glob_reb_id: RebId,
    pub daemon_id: NodeId,
}

impl RegularAck {
    pub fn pack(&self) -> Vec<u8> {
        bincode::serialize(self).expect("ack token encodes")
    }

    pub fn unpack(raw: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(raw)?)
    }
}

/// One object awaiting its ack.
pub struct AckEntry {
    pub lom: Lom,
    pub dst: NodeId,
    pub sent_at: Instant,
    pub retries: u32,
}

/// Sharded pending-ack tables.
pub struct LomAcks {
    shards: Vec<Mutex<HashMap<String, AckEntry>>>,
}

impl Default for LomAcks {
    fn default() -> Self {
        Self::new()
    }
}

impl LomAcks {
    pub fn new() -> Self {
        Self {
            shards: (0..ACK_SHARDS).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    fn shard(&self, uname: &str) -> &Mutex<HashMap<String, AckEntry>> {
        let h = xxhash_rust::xxh3::xxh3_64(uname.as_bytes()) as usize;
        &self.shards[h % ACK_SHARDS]
    }

    /// Insert before the send; happens-before the network write returns.
    pub fn insert(&self, lom: Lom, dst: NodeId, now: Instant) {
        let uname = lom.uname();
        self.shard(&uname).lock().insert(
            uname,
            AckEntry {
                lom,
                dst,
                sent_at: now,
                retries: 0,
            },
        );
    }

    /// Delete on ack (or on send failure); returns the entry when present.
    pub fn remove(&self, uname: &str) -> Option<AckEntry> {
        self.shard(uname).lock().remove(uname)
    }

    pub fn pending(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.pending() == 0
    }

    /// Unames of all pending entries.
    pub fn pending_unames(&self) -> Vec<String> {
        let mut out = Vec::new();
        for shard in &self.shards {
            out.extend(shard.lock().keys().cloned());
        }
        out
    }

    /// Destination IDs still owed acks, resolved against `smap` (the status
    /// endpoint's tmap).
    pub fn pending_targets(&self, smap: &Smap) -> Vec<NodeId> {
        let mut out = std::collections::HashSet::new();
        for shard in &self.shards {
            let shard = shard.lock();
            for entry in shard.values() {
                if let Ok(tsi) = hrw_target(&entry.lom.uname(), smap) {
                    out.insert(tsi.id);
                }
            }
        }
        out.into_iter().collect()
    }

    /// Wait-ack sweep: take every entry, splitting it into retransmit
    /// candidates (HRW owner unchanged) and drops (owner moved or no longer
    /// resolvable). Retransmit candidates are handed back to the caller; it
    /// re-inserts them on send.
    pub fn sweep(&self, smap: &Smap, now: Instant) -> SweepOutcome {
        let mut retransmit = Vec::new();
        let mut dropped = 0usize;
        for shard in &self.shards {
            let mut shard = shard.lock();
            for (_, mut entry) in shard.drain() {
                match hrw_target(&entry.lom.uname(), smap) {
                    Ok(tsi) if tsi.id == entry.dst => {
                        entry.retries += 1;
                        entry.sent_at = now;
                        retransmit.push(entry);
                    }
                    _ => dropped += 1,
                }
            }
        }
        SweepOutcome { retransmit, dropped }
    }

    pub fn clear(&self) {
        for shard in &self.shards {
            shard.lock().clear();
        }
    }
}

/// What a wait-ack sweep decided.
pub struct SweepOutcome {
    pub retransmit: Vec<AckEntry>,
    pub dropped: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::Snode;
    use crate::fs::Mountpath;
    use crate::types::Bck;

    fn make_smap(ids: &[u64]) -> Smap {
        let mut smap = Smap::new(1);
        for &id in ids {
            smap.add_target(Snode::new_target(
                id,
                format!("t{}", id),
                format!("http://127.0.0.1:{}", 9000 + id),
            ));
        }
        smap
    }

    fn make_lom(name: &str) -> Lom {
        Lom::place(Bck::native("bck1"), name, &Mountpath::new("/data/mp1"))
    }

    #[test]
    fn test_insert_remove() {
        let acks = LomAcks::new();
        let lom = make_lom("obj1");
        let uname = lom.uname();
        acks.insert(lom, 2, Instant::now());
        assert_eq!(acks.pending(), 1);
        assert!(acks.remove(&uname).is_some());
        assert!(acks.remove(&uname).is_none());
        assert!(acks.is_empty());
    }

    #[test]
    fn test_ack_token_roundtrip() {
        let token = RegularAck {
            glob_reb_id: 10,
            daemon_id: 3,
        };
        let packed = token.pack();
        assert_eq!(RegularAck::unpack(&packed).unwrap(), token);
    }

    #[test]
    fn test_sweep_splits_by_hrw_owner() {
        let smap = make_smap(&[1, 2, 3]);
        let acks = LomAcks::new();
        let now = Instant::now();

        // seed entries whose recorded destination matches the current HRW
        // owner, and a few pointing at a stale owner
        let mut matching = 0;
        for i in 0..50 {
            let lom = make_lom(&format!("obj-{}", i));
            let owner = hrw_target(&lom.uname(), &smap).unwrap().id;
            let dst = if i % 5 == 0 {
                // deliberately wrong destination
                if owner == 1 {
                    2
                } else {
                    1
                }
            } else {
                matching += 1;
                owner
            };
            acks.insert(lom, dst, now);
        }

        let outcome = acks.sweep(&smap, now);
        assert_eq!(outcome.retransmit.len(), matching);
        assert_eq!(outcome.dropped, 50 - matching);
        assert!(acks.is_empty());
        for entry in &outcome.retransmit {
            assert_eq!(entry.retries, 1);
        }
    }

    #[test]
    fn test_pending_targets() {
        let smap = make_smap(&[1, 2, 3]);
        let acks = LomAcks::new();
        let now = Instant::now();
        for i in 0..20 {
            let lom = make_lom(&format!("obj-{}", i));
            let owner = hrw_target(&lom.uname(), &smap).unwrap().id;
            acks.insert(lom, owner, now);
        }
        let targets = acks.pending_targets(&smap);
        assert!(!targets.is_empty());
        assert!(targets.iter().all(|id| [1, 2, 3].contains(id)));
    }
}

//! Versioned cluster membership snapshot.

use crate::types::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Node capability flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeFlags {
    /// Proxies only: excluded from primary election.
    #[serde(default)]
    pub non_electable: bool,
}

/// A cluster node (proxy or storage target).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snode {
    pub id: NodeId,
    pub name: String,
    pub public_url: String,
    pub intra_control_url: String,
    pub intra_data_url: String,
    /// Precomputed 64-bit rendezvous digest. Zero means the node was never
    /// initialized and must be treated as ineligible.
    pub digest: u64,
    #[serde(default)]
    pub flags: NodeFlags,
}

impl Snode {
    pub fn new_target(id: NodeId, name: impl Into<String>, base_url: impl Into<String>) -> Self {
        let url: String = base_url.into();
        Self {
            id,
            name: name.into(),
            public_url: url.clone(),
            intra_control_url: url.clone(),
            intra_data_url: url,
            digest: Self::compute_digest(id),
            flags: NodeFlags::default(),
        }
    }

    /// The rendezvous digest is derived once from the node identity; all
    /// Smap copies of the node must carry the same value.
    pub fn compute_digest(id: NodeId) -> u64 {
        let seed = format!("snode-{:016x}", id);
        let d = xxhash_rust::xxh3::xxh3_64(seed.as_bytes());
        // zero is reserved for "uninitialized"
        if d == 0 {
            1
        } else {
            d
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.digest != 0
    }
}

impl fmt::Display for Snode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[t{}]", self.name, self.id)
    }
}

/// Versioned snapshot of cluster membership. Produced by the control plane,
/// consumed read-only; a rebalance run is pinned to one version.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Smap {
    pub version: i64,
    /// Storage targets by ID.
    pub tmap: HashMap<NodeId, Snode>,
    /// Proxies by ID.
    pub pmap: HashMap<NodeId, Snode>,
    /// Primary proxy ID.
    pub primary: NodeId,
}

impl Smap {
    pub fn new(version: i64) -> Self {
        Self {
            version,
            ..Default::default()
        }
    }

    pub fn count_targets(&self) -> usize {
        self.tmap.len()
    }

    pub fn count_proxies(&self) -> usize {
        self.pmap.len()
    }

    pub fn get_target(&self, id: NodeId) -> Option<&Snode> {
        self.tmap.get(&id)
    }

    pub fn add_target(&mut self, node: Snode) {
        self.tmap.insert(node.id, node);
    }

    /// Next snapshot with the given target added and the version bumped.
    pub fn with_target(&self, node: Snode) -> Self {
        let mut next = self.clone();
        next.version += 1;
        next.add_target(node);
        next
    }
}

/// Shared, immutable Smap handle as passed around the orchestrator.
pub type SmapRef = Arc<Smap>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_nonzero_and_stable() {
        for id in 1..100u64 {
            let a = Snode::compute_digest(id);
            assert_ne!(a, 0);
            assert_eq!(a, Snode::compute_digest(id));
        }
    }

    #[test]
    fn test_with_target_bumps_version() {
        let mut smap = Smap::new(5);
        smap.add_target(Snode::new_target(1, "t1", "http://127.0.0.1:9001"));
        let next = smap.with_target(Snode::new_target(2, "t2", "http://127.0.0.1:9002"));
        assert_eq!(next.version, 6);
        assert_eq!(next.count_targets(), 2);
        assert_eq!(smap.count_targets(), 1);
    }
}

//! Rebalance stages and per-peer stage bookkeeping.

use crate::types::NodeId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Point in the rebalance state machine. The numeric order is load-bearing:
/// wait predicates compare stages with `>=`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    #[default]
    Inactive = 0,
    Init = 1,
    Traverse = 2,
    EcNamespace = 3,
    EcDetect = 4,
    EcGlobRepair = 5,
    EcBatches = 6,
    EcCleanup = 7,
    WaitAck = 8,
    Fin = 9,
    Done = 10,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Inactive => "inactive",
            Stage::Init => "init",
            Stage::Traverse => "traverse",
            Stage::EcNamespace => "ec-namespace",
            Stage::EcDetect => "ec-detect",
            Stage::EcGlobRepair => "ec-glob-repair",
            Stage::EcBatches => "ec-batches",
            Stage::EcCleanup => "ec-cleanup",
            Stage::WaitAck => "wait-ack",
            Stage::Fin => "fin",
            Stage::Done => "done",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct PeerState {
    stage: Stage,
    batch: i64,
}

/// Per-peer stage bookkeeping. Fed by push notifications and status polls;
/// consumed by the wait predicates.
#[derive(Default)]
pub struct StageRegistry {
    peers: Mutex<HashMap<NodeId, PeerState>>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a peer's stage. Batch is meaningful only for EC batch stages.
    pub fn set_stage(&self, node: NodeId, stage: Stage, batch: i64) {
        let mut peers = self.peers.lock();
        peers.insert(node, PeerState { stage, batch });
    }

    pub fn stage_of(&self, node: NodeId) -> Stage {
        self.peers
            .lock()
            .get(&node)
            .map(|p| p.stage)
            .unwrap_or_default()
    }

    /// True when the peer has reached `stage` (or any later one).
    pub fn is_in_stage(&self, node: NodeId, stage: Stage) -> bool {
        self.stage_of(node) >= stage
    }

    /// True when the peer has reached `(stage, batch)`.
    pub fn is_in_stage_batch(&self, node: NodeId, stage: Stage, batch: i64) -> bool {
        let peers = self.peers.lock();
        match peers.get(&node) {
            Some(p) => p.stage > stage || (p.stage == stage && p.batch >= batch),
            None => false,
        }
    }

    /// Peers (from `all`, excluding `me`) that have not reached `stage` yet.
    pub fn count_not_in_stage(&self, all: &[NodeId], me: NodeId, stage: Stage) -> usize {
        all.iter()
            .filter(|&&id| id != me && !self.is_in_stage(id, stage))
            .count()
    }

    /// Forget everything (between runs).
    pub fn cleanup(&self) {
        self.peers.lock().clear();
    }
}

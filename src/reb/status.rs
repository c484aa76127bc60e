//! Rebalance status reporting.
//!
//! Served to peers via `GET /v1/health?rebalance=true`. The `tmap` field
//! (targets this node still waits acks from) is expensive to recompute, so a
//! cached copy is returned between refreshes.

use crate::cluster::Snode;
use crate::reb::stage::Stage;
use crate::stats::RebStatsSnapshot;
use crate::types::{NodeId, RebId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Status of the local rebalance run, as reported to peers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Status {
    /// Current cluster map version on this node.
    pub smap_version: i64,
    /// Smap version of the rebalance run this node is in.
    pub reb_version: i64,
    /// Global rebalance generation ID.
    pub glob_reb_id: RebId,
    /// Current stage.
    pub stage: Stage,
    pub aborted: bool,
    pub running: bool,
    /// All transport queues empty.
    pub quiescent: bool,
    /// Targets this node is still waiting acks from (wait-ack stage only).
    #[serde(default)]
    pub tmap: HashMap<NodeId, Snode>,
    /// EC batch progress; zero outside the EC batch stages.
    #[serde(default)]
    pub batch_curr: i64,
    #[serde(default)]
    pub batch_last: i64,
    /// Objects the EC repair could not restore (insufficient slices).
    #[serde(default)]
    pub ec_broken: usize,
    /// Traffic since the run began.
    #[serde(default)]
    pub stats_delta: RebStatsSnapshot,
}

/// Time-bounded cache of the wait-ack target map.
pub struct TmapCache {
    refresh_every: Duration,
    state: Mutex<TmapCacheState>,
}

struct TmapCacheState {
    tmap: HashMap<NodeId, Snode>,
    refreshed_at: Option<Instant>,
}

impl TmapCache {
    pub fn new(refresh_every: Duration) -> Self {
        Self {
            refresh_every,
            state: Mutex::new(TmapCacheState {
                tmap: HashMap::new(),
                refreshed_at: None,
            }),
        }
    }

    /// Return the cached map, recomputing via `build` at most once per
    /// refresh interval.
    pub fn get_or_refresh<F>(&self, now: Instant, build: F) -> HashMap<NodeId, Snode>
    where
        F: FnOnce() -> HashMap<NodeId, Snode>,
    {
        let mut state = self.state.lock();
        let stale = match state.refreshed_at {
            None => true,
            Some(at) => now.duration_since(at) >= self.refresh_every,
        };
        if stale {
            state.tmap = build();
            state.refreshed_at = Some(now);
        }
        state.tmap.clone()
    }

    pub fn invalidate(&self) {
        let mut state = self.state.lock();
        state.tmap.clear();
        state.refreshed_at = None;
    }
}

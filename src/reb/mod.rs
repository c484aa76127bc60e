//! Global rebalance orchestrator.
//!
//! One [`RebManager`] per target drives a 10-stage pipeline per rebalance
//! generation: precheck -> init -> traverse (with an optional parallel EC
//! pipeline) -> wait-ack -> fin -> done. Peers synchronize through status
//! polls, push notifications, and the quiesce protocol; a newer cluster map
//! observed anywhere aborts the generation.

mod ack;
mod bcast;
mod ec_reb;
mod jogger;
mod quiesce;
mod recv;
mod stage;
mod status;

pub use ack::{LomAcks, RegularAck};
pub use ec_reb::{EcRebState, RebCt};
pub use quiesce::{AckWaitBudget, PushQuorum, QuiesceGate, QuiesceVerdict};
pub use stage::{Stage, StageRegistry};
pub use status::{Status, TmapCache};

use crate::cluster::{Smap, Snode};
use crate::config::TalusConfig;
use crate::error::{Result, TalusError};
use crate::fs::{put_marker, rm_marker, Mountpath, MountpathSet};
use crate::gfn::GfnFilter;
use crate::lom::LomLocker;
use crate::memsys::MemManager;
use crate::stats::{RebStats, RebStatsSnapshot};
use crate::transport::{ReceiverRegistry, StreamBundle, StreamCollector};
use crate::types::{NodeId, RebId};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

const MARKER_ACTION: &str = "rebalance";

/// Capability surface of a long-running cluster operation.
pub trait Xact: Send + Sync {
    fn id(&self) -> RebId;
    fn kind(&self) -> &'static str;
    fn abort(&self);
    fn aborted(&self) -> bool;
    fn finished(&self) -> bool;
}

/// The rebalance xaction: one per generation.
pub struct RebXact {
    id: RebId,
    reb_version: i64,
    aborted: AtomicBool,
    done: AtomicBool,
    started: Instant,
    ended: Mutex<Option<Instant>>,
}

impl RebXact {
    fn new(id: RebId, reb_version: i64) -> Self {
        Self {
            id,
            reb_version,
            aborted: AtomicBool::new(false),
            done: AtomicBool::new(false),
            started: Instant::now(),
            ended: Mutex::new(None),
        }
    }

    pub fn reb_version(&self) -> i64 {
        self.reb_version
    }

    pub fn runtime(&self) -> Duration {
        (*self.ended.lock())
            .map(|end| end.duration_since(self.started))
            .unwrap_or_else(|| self.started.elapsed())
    }

    fn mark_done(&self) {
        if !self.done.swap(true, Ordering::AcqRel) {
            *self.ended.lock() = Some(Instant::now());
        }
    }
}

impl Xact for RebXact {
    fn id(&self) -> RebId {
        self.id
    }

    fn kind(&self) -> &'static str {
        "rebalance"
    }

    fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
    }

    fn aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    fn finished(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }
}

/// Arguments of one rebalance generation.
#[derive(Clone)]
pub struct RunArgs {
    pub id: RebId,
    pub smap: Arc<Smap>,
    pub paths: MountpathSet,
    pub ec_used: bool,
    /// Rebalancing a single bucket (e.g. after a rename).
    pub single_bck: bool,
}

/// Stage push notification, POSTed to peers on every local transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagePush {
    pub node_id: NodeId,
    pub glob_reb_id: RebId,
    pub stage: Stage,
    #[serde(default)]
    pub batch: i64,
}

/// EC namespace push body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamespacePush {
    pub node_id: NodeId,
    pub cts: Vec<RebCt>,
}

/// The per-target rebalance manager.
pub struct RebManager {
    pub(crate) config: Arc<TalusConfig>,
    pub(crate) self_id: NodeId,
    pub(crate) client: reqwest::Client,
    pub(crate) collector: Arc<StreamCollector>,
    pub(crate) receiver: Arc<ReceiverRegistry>,
    pub(crate) locker: Arc<LomLocker>,
    pub(crate) mem: MemManager,
    pub(crate) stats: Arc<RebStats>,
    pub(crate) gfn: GfnFilter,
    pub(crate) stages: StageRegistry,
    pub(crate) lom_acks: LomAcks,
    pub(crate) ec: EcRebState,

    cluster_smap: RwLock<Arc<Smap>>,
    run_smap: RwLock<Option<Arc<Smap>>>,
    run_mpaths: RwLock<MountpathSet>,
    pub(crate) glob_reb_id: AtomicI64,
    stage: AtomicU32,
    pub(crate) laterx: AtomicBool,
    xact: RwLock<Option<Arc<RebXact>>>,

    data_bundle: RwLock<Option<Arc<StreamBundle>>>,
    ack_bundle: RwLock<Option<Arc<StreamBundle>>>,
    ec_bundle: RwLock<Option<Arc<StreamBundle>>>,

    run_sema: Arc<tokio::sync::Semaphore>,
    begin_stats: Mutex<Option<RebStatsSnapshot>>,
    tmap_cache: TmapCache,
}

impl RebManager {
    pub fn new(
        config: Arc<TalusConfig>,
        collector: Arc<StreamCollector>,
        receiver: Arc<ReceiverRegistry>,
        mem: MemManager,
    ) -> Arc<Self> {
        let keepalive_retry = config.timeout.keepalive_retry();
        let manager = Arc::new(Self {
            self_id: config.node.id,
            client: reqwest::Client::new(),
            collector,
            receiver,
            locker: Arc::new(LomLocker::new()),
            mem,
            stats: Arc::new(RebStats::default()),
            gfn: GfnFilter::new(64 * 1024),
            stages: StageRegistry::new(),
            lom_acks: LomAcks::new(),
            ec: EcRebState::default(),
            cluster_smap: RwLock::new(Arc::new(Smap::default())),
            run_smap: RwLock::new(None),
            run_mpaths: RwLock::new(MountpathSet::new(&config.storage.mountpaths)),
            glob_reb_id: AtomicI64::new(0),
            stage: AtomicU32::new(Stage::Inactive as u32),
            laterx: AtomicBool::new(false),
            xact: RwLock::new(None),
            data_bundle: RwLock::new(None),
            ack_bundle: RwLock::new(None),
            ec_bundle: RwLock::new(None),
            run_sema: Arc::new(tokio::sync::Semaphore::new(1)),
            begin_stats: Mutex::new(None),
            tmap_cache: TmapCache::new(keepalive_retry),
            config,
        });
        manager.install_handlers();
        manager
    }

    // accessors shared across the module

    pub fn update_smap(&self, smap: Arc<Smap>) {
        let mut cur = self.cluster_smap.write();
        if smap.version > cur.version {
            *cur = smap;
        }
    }

    pub(crate) fn cluster_smap_version(&self) -> i64 {
        self.cluster_smap.read().version
    }

    /// The run's pinned map when a run is active, the node's view otherwise.
    pub(crate) fn current_smap(&self) -> Arc<Smap> {
        if let Some(smap) = self.run_smap.read().clone() {
            return smap;
        }
        self.cluster_smap.read().clone()
    }

    pub(crate) fn run_mpaths(&self) -> MountpathSet {
        self.run_mpaths.read().clone()
    }

    /// Deterministic local mountpath for an object UID.
    pub(crate) fn mpath_for(&self, uname: &str, mpaths: &MountpathSet) -> Mountpath {
        let idx = xxhash_rust::xxh3::xxh3_64(uname.as_bytes()) as usize
            % mpaths.available.len().max(1);
        mpaths
            .available
            .get(idx)
            .cloned()
            .unwrap_or_else(|| Mountpath::new("/"))
    }

    pub fn stage(&self) -> Stage {
        stage_from_u32(self.stage.load(Ordering::Acquire))
    }

    fn set_stage(&self, stage: Stage) {
        self.stage.store(stage as u32, Ordering::Release);
    }

    pub fn glob_reb_id(&self) -> RebId {
        self.glob_reb_id.load(Ordering::Acquire)
    }

    pub fn current_xact(&self) -> Option<Arc<RebXact>> {
        self.xact.read().clone()
    }

    /// The inbound handler registry this manager is wired to.
    pub fn receiver(&self) -> Arc<ReceiverRegistry> {
        Arc::clone(&self.receiver)
    }

    pub fn aborted(&self) -> bool {
        self.current_xact().map(|x| x.aborted()).unwrap_or(false)
    }

    /// Sleep one tick, then report the abort flag (the canonical wait-loop
    /// step).
    pub(crate) async fn aborted_after(&self, sleep: Duration) -> bool {
        tokio::time::sleep(sleep).await;
        self.aborted()
    }

    /// Local-only abort: peers discover it through their status polls.
    pub fn abort_local(&self, reason: impl Into<String>) {
        let reason = reason.into();
        if let Some(xact) = self.current_xact() {
            if !xact.aborted() {
                warn!(id = xact.id(), "aborting rebalance: {}", reason);
                xact.abort();
            }
        }
    }

    pub(crate) fn data_bundle(&self) -> Option<Arc<StreamBundle>> {
        self.data_bundle.read().clone()
    }

    pub(crate) fn ack_bundle(&self) -> Option<Arc<StreamBundle>> {
        self.ack_bundle.read().clone()
    }

    pub(crate) fn ec_bundle(&self) -> Option<Arc<StreamBundle>> {
        self.ec_bundle.read().clone()
    }

    /// All local transport queues empty.
    pub fn is_quiescent(&self) -> bool {
        [&self.data_bundle, &self.ack_bundle, &self.ec_bundle]
            .iter()
            .all(|b| b.read().as_ref().map(|b| b.is_quiescent()).unwrap_or(true))
    }

    /// Advance the local stage and push the transition to every peer.
    pub(crate) async fn change_stage(self: &Arc<Self>, md: &Arc<RunArgs>, stage: Stage, batch: i64) {
        self.set_stage(stage);
        let push = StagePush {
            node_id: self.self_id,
            glob_reb_id: md.id,
            stage,
            batch,
        };
        for tsi in md.smap.tmap.values() {
            if tsi.id == self.self_id {
                continue;
            }
            let m = Arc::clone(self);
            let tsi = tsi.clone();
            let push = push.clone();
            tokio::spawn(async move {
                if let Err(e) = m.push_stage(&tsi, &push).await {
                    tracing::debug!(peer = %tsi, "stage push failed: {}", e);
                }
            });
        }
    }

    // intra-cluster control calls

    async fn push_stage(&self, tsi: &Snode, push: &StagePush) -> Result<()> {
        let url = format!("{}/v1/rebalance/stage", tsi.intra_control_url);
        let resp = self
            .client
            .post(url)
            .json(push)
            .timeout(self.config.timeout.max_keepalive)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(TalusError::UnexpectedStatus(resp.status().as_u16()));
        }
        Ok(())
    }

    pub(crate) async fn push_ec_namespace(&self, tsi: &Snode, cts: &[RebCt]) -> Result<()> {
        let url = format!("{}/v1/rebalance/namespace", tsi.intra_control_url);
        let body = NamespacePush {
            node_id: self.self_id,
            cts: cts.to_vec(),
        };
        let resp = self
            .client
            .post(url)
            .json(&body)
            .timeout(self.config.timeout.status_poll)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(TalusError::UnexpectedStatus(resp.status().as_u16()));
        }
        Ok(())
    }

    /// Pull a peer's EC namespace: `Some(list)` when ready, `None` when the
    /// peer is still collecting (202).
    pub(crate) async fn fetch_ec_namespace(&self, tsi: &Snode) -> Result<Option<Vec<RebCt>>> {
        let url = format!("{}/v1/rebalance/namespace", tsi.intra_control_url);
        let resp = self
            .client
            .get(url)
            .timeout(self.config.timeout.status_poll)
            .send()
            .await?;
        match resp.status().as_u16() {
            202 => Ok(None),
            204 => Ok(Some(Vec::new())),
            200 => Ok(Some(resp.json::<Vec<RebCt>>().await?)),
            code => Err(TalusError::UnexpectedStatus(code)),
        }
    }

    // inbound control handlers (wired by the daemon)

    pub fn handle_stage_push(&self, push: StagePush) {
        self.stages.set_stage(push.node_id, push.stage, push.batch);
    }

    pub fn handle_namespace_push(&self, push: NamespacePush) {
        self.ec.set_node_data(push.node_id, push.cts);
    }

    /// Reply body for a namespace pull: `(202, None)` while collecting,
    /// `(204, None)` when there is nothing local, `(200, Some)` otherwise.
    pub fn ec_namespace_response(&self) -> (u16, Option<Vec<RebCt>>) {
        if self.stage() < Stage::EcDetect {
            return (202, None);
        }
        let listing = self.ec.local_listing();
        if listing.is_empty() {
            return (204, None);
        }
        (200, Some(listing))
    }

    /// Status record served via `GET /v1/health?rebalance=true`.
    pub fn get_status(&self) -> Status {
        let smap_version = self.cluster_smap_version();
        let run_smap = self.run_smap.read().clone();
        let reb_version = run_smap.as_ref().map(|s| s.version).unwrap_or(0);
        let (aborted, running) = self
            .current_xact()
            .map(|x| (x.aborted(), !x.finished()))
            .unwrap_or((false, false));
        let stage = self.stage();

        let mut status = Status {
            smap_version,
            reb_version,
            glob_reb_id: self.glob_reb_id(),
            stage,
            aborted,
            running,
            quiescent: self.is_quiescent(),
            ..Default::default()
        };
        if stage > Stage::EcGlobRepair && stage < Stage::EcCleanup {
            status.batch_curr = self.ec.batch_curr.load(Ordering::Relaxed);
            status.batch_last = self.ec.batch_last.load(Ordering::Relaxed);
        }
        status.ec_broken = self.ec.unrecovered_count();
        if let Some(begin) = *self.begin_stats.lock() {
            status.stats_delta = self.stats.snapshot().delta(&begin);
        }
        if stage == Stage::WaitAck {
            if smap_version != reb_version {
                warn!(smap_version, reb_version, "map versions diverged");
                return status;
            }
            if let Some(rsmap) = run_smap {
                status.tmap = self.tmap_cache.get_or_refresh(Instant::now(), || {
                    self.lom_acks
                        .pending_targets(&rsmap)
                        .into_iter()
                        .filter_map(|id| rsmap.get_target(id).map(|n| (id, n.clone())))
                        .collect()
                });
            }
        }
        status
    }

    // the 10-stage driver

    /// Run one rebalance generation. `id` must be monotonically increasing
    /// (and at least the triggering Smap version); an equal-or-greater
    /// active generation wins and this call exits quietly.
    pub async fn run_rebalance(
        self: &Arc<Self>,
        smap: Arc<Smap>,
        id: RebId,
        buckets: &[String],
    ) -> Result<()> {
        let mut md = RunArgs {
            id,
            smap,
            paths: MountpathSet::default(),
            ec_used: self.config.ec.enabled && buckets.is_empty(),
            single_bck: buckets.len() == 1,
        };
        if md.single_bck {
            md.ec_used = self.config.ec.enabled;
        }

        if !self.precheck(&mut md).await? {
            return Ok(());
        }
        let permit = match self.run_sema.clone().try_acquire_owned() {
            Ok(p) => p,
            Err(_) => {
                info!(id, "another rebalance holds the run semaphore");
                return Ok(());
            }
        };
        if self.glob_reb_id() >= md.id {
            info!(id, "equal-or-greater generation already ran");
            return Ok(());
        }

        let md = Arc::new(md);
        let xact = self.init(&md);
        info!(id = md.id, smap = md.smap.version, "rebalance initialized");

        let run_res = self.sync_and_run(&md).await;
        let mut err_cnt = 0;
        match run_res {
            Ok(()) => {
                err_cnt = self.wait_ack(&md).await;
            }
            Err(e) => warn!(id = md.id, "traverse failed: {}", e),
        }

        self.change_stage(&md, Stage::Fin, 0).await;
        while err_cnt != 0 && !self.aborted() {
            let m = Arc::clone(self);
            err_cnt = m
                .bcast(&md, |m, tsi, md| async move {
                    m.wait_fin_extended(tsi, md).await
                })
                .await;
        }
        self.fini(&md, &xact).await;
        drop(permit);

        if xact.aborted() {
            Err(TalusError::Aborted(format!("rebalance g{}", md.id)))
        } else {
            Ok(())
        }
    }

    /// Stage 2: ping the cluster, serialize on the generation ID, snapshot
    /// mountpaths. `Ok(false)` means "do not run" without error.
    async fn precheck(self: &Arc<Self>, md: &mut RunArgs) -> Result<bool> {
        if md.ec_used {
            self.ec.cleanup();
            // the broken count survives a finished run for status readers;
            // a fresh generation starts over
            self.ec.unrecovered.store(0, Ordering::Relaxed);
        }
        if self.glob_reb_id() >= md.id {
            info!(
                running = self.glob_reb_id(),
                requested = md.id,
                "rebalance already at this generation"
            );
            return Ok(false);
        }

        let probe = Arc::new(md.clone());
        let m = Arc::clone(self);
        let err_cnt = m
            .bcast(&probe, |m, tsi, md| async move {
                m.ping_target(tsi, md).await
            })
            .await;
        if err_cnt > 0 {
            warn!(id = md.id, "{} targets unreachable in precheck", err_cnt);
            return Ok(false);
        }
        if self.cluster_smap_version() > md.smap.version {
            return Err(TalusError::NewerEpoch {
                have: md.smap.version,
                seen: self.cluster_smap_version(),
            });
        }
        md.paths = MountpathSet::new(&self.config.storage.mountpaths);
        Ok(true)
    }

    /// Stage 3: allocate run state, open streams, drop the marker.
    fn init(self: &Arc<Self>, md: &Arc<RunArgs>) -> Arc<RebXact> {
        self.set_stage(Stage::Init);
        let xact = Arc::new(RebXact::new(md.id, md.smap.version));
        *self.xact.write() = Some(Arc::clone(&xact));

        *self.begin_stats.lock() = Some(self.stats.snapshot());
        self.lom_acks.clear();
        self.tmap_cache.invalidate();
        self.stages.cleanup();

        for (slot, trans) in [
            (&self.data_bundle, recv::TRANS_DATA),
            (&self.ack_bundle, recv::TRANS_ACK),
            (&self.ec_bundle, recv::TRANS_EC),
        ] {
            *slot.write() = Some(Arc::new(StreamBundle::new(
                self.self_id,
                trans,
                Arc::clone(&self.collector),
                self.client.clone(),
                self.config.transport.clone(),
            )));
        }

        if let Err(e) = put_marker(&md.paths, MARKER_ACTION) {
            warn!("failed to create in-progress marker: {}", e);
        }

        // ready: publish the run and start receiving
        *self.run_smap.write() = Some(Arc::clone(&md.smap));
        *self.run_mpaths.write() = md.paths.clone();
        self.glob_reb_id.store(md.id, Ordering::Release);
        self.laterx.store(false, Ordering::Release);
        xact
    }

    /// Stage 4: traverse - regular joggers, EC pipeline, or both in
    /// parallel.
    async fn sync_and_run(self: &Arc<Self>, md: &Arc<RunArgs>) -> Result<()> {
        self.change_stage(md, Stage::Traverse, 0).await;
        let m = Arc::clone(self);
        let _ = m
            .bcast(md, |m, tsi, md| async move { m.rx_ready(tsi, md).await })
            .await;
        if self.aborted() {
            return Err(TalusError::Aborted(format!("g{}", md.id)));
        }

        if !md.ec_used {
            info!(id = md.id, "starting regular rebalance");
            return self.run_joggers(md).await;
        }
        if md.single_bck {
            info!(id = md.id, "starting EC-only rebalance for a bucket");
            return self.run_ec_rebalance(md).await;
        }

        info!(id = md.id, "starting regular and EC rebalance in parallel");
        let (reg, ec) = tokio::join!(self.run_joggers(md), self.run_ec_rebalance(md));
        reg.and(ec)
    }

    /// Stage 5: wait for acks, retransmit leftovers, re-verify peers.
    async fn wait_ack(self: &Arc<Self>, md: &Arc<RunArgs>) -> usize {
        self.change_stage(md, Stage::WaitAck, 0).await;
        let sleep = self.config.timeout.cplane_operation;
        let budget = AckWaitBudget::new(
            self.config.rebalance.dest_retry_time,
            self.config.rebalance.ack_grace_per10,
            self.config.rebalance.ack_grace_clamp,
            md.smap.count_targets(),
        );
        let mut err_cnt = 0;

        loop {
            let started = Instant::now();
            let mut cnt;
            loop {
                cnt = self.lom_acks.pending();
                if cnt == 0 {
                    info!(id = md.id, "received all acks");
                    break;
                }
                if let Some(uname) = self.lom_acks.pending_unames().into_iter().next() {
                    info!(id = md.id, pending = cnt, obj = %uname, "waiting for acks");
                }
                if self.aborted_after(sleep).await {
                    return 0;
                }
                if budget.expired(started, Instant::now()) {
                    break;
                }
            }
            if cnt > 0 {
                warn!(id = md.id, pending = cnt, "timed out waiting for acks");
            }
            if self.aborted() {
                return 0;
            }

            let live = MountpathSet::new(&self.config.storage.mountpaths);
            if live.len() > md.paths.len() {
                warn!(
                    had = md.paths.len(),
                    have = live.len(),
                    "mountpath changes detected mid-run"
                );
            }

            // synchronize: every peer must reach fin (or wait-ack not-on-us)
            let m = Arc::clone(self);
            err_cnt = m
                .bcast(md, |m, tsi, md| async move {
                    m.wait_fin_extended(tsi, md).await
                })
                .await;
            if self.aborted() {
                return err_cnt;
            }

            // retransmit what survives HRW re-checks, drop the rest
            let outcome = self.lom_acks.sweep(&md.smap, Instant::now());
            if outcome.dropped > 0 {
                info!(dropped = outcome.dropped, "acks dropped (owner moved)");
            }
            let resend = outcome.retransmit;
            if resend.is_empty() || self.aborted() {
                return err_cnt;
            }
            let n = resend.len();
            for entry in resend {
                self.stats.retransmits.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = self.send_object(md, entry.lom).await {
                    if e.is_fatal_for_run() {
                        return err_cnt;
                    }
                }
            }
            warn!(id = md.id, retransmitted = n, "more wack...");
        }
    }

    /// Stages 6-7: quiesce, then tear down.
    async fn fini(self: &Arc<Self>, md: &Arc<RunArgs>, xact: &Arc<RebXact>) {
        let sleep = self.config.timeout.cplane_operation;
        let mut gate = QuiesceGate::new(self.config.rebalance.quiesce, sleep);
        let mut aborted = self.aborted();
        while !aborted {
            let local_activity = self.laterx.swap(false, Ordering::AcqRel);
            let peers_quiet = self.nodes_quiescent(md).await;
            if gate.observe(local_activity, peers_quiet) == QuiesceVerdict::Quiet {
                break;
            }
            aborted = self.aborted_after(sleep).await;
        }

        if !aborted {
            if let Err(e) = rm_marker(&md.paths, MARKER_ACTION) {
                warn!("failed to remove in-progress marker: {}", e);
            }
        }

        // drain and close all streams regardless of how we got here
        for slot in [&self.data_bundle, &self.ack_bundle, &self.ec_bundle] {
            let bundle = slot.write().take();
            if let Some(bundle) = bundle {
                bundle.close().await;
            }
        }
        self.gfn.reset();
        xact.mark_done();

        if let Some(begin) = *self.begin_stats.lock() {
            let delta = self.stats.snapshot().delta(&begin);
            info!(
                id = md.id,
                tx = delta.tx_reb_count,
                rx = delta.rx_reb_count,
                retransmits = delta.retransmits,
                runtime = ?xact.runtime(),
                "rebalance finished"
            );
        }
        self.set_stage(Stage::Done);
        if md.ec_used {
            self.ec.cleanup();
        }
        self.stages.cleanup();
    }
}

fn stage_from_u32(v: u32) -> Stage {
    match v {
        1 => Stage::Init,
        2 => Stage::Traverse,
        3 => Stage::EcNamespace,
        4 => Stage::EcDetect,
        5 => Stage::EcGlobRepair,
        6 => Stage::EcBatches,
        7 => Stage::EcCleanup,
        8 => Stage::WaitAck,
        9 => Stage::Fin,
        10 => Stage::Done,
        _ => Stage::Inactive,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_u32_roundtrip() {
        for stage in [
            Stage::Inactive,
            Stage::Init,
            Stage::Traverse,
            Stage::EcNamespace,
            Stage::EcDetect,
            Stage::EcGlobRepair,
            Stage::EcBatches,
            Stage::EcCleanup,
            Stage::WaitAck,
            Stage::Fin,
            Stage::Done,
        ] {
            assert_eq!(stage_from_u32(stage as u32), stage);
        }
    }

    #[test]
    fn test_xact_lifecycle() {
        let xact = RebXact::new(7, 6);
        assert_eq!(xact.id(), 7);
        assert_eq!(xact.kind(), "rebalance");
        assert!(!xact.aborted());
        assert!(!xact.finished());

        xact.abort();
        assert!(xact.aborted());

        xact.mark_done();
        assert!(xact.finished());
        // idempotent
        xact.mark_done();
        assert!(xact.finished());
    }
}

//! EC rebalance: namespace exchange, misplacement detection, and batched
//! reconstruction.
//!
//! The pipeline runs in parallel with the regular object joggers whenever
//! any bucket has EC enabled (and the run is not single-bucket):
//!
//! 1. **namespace** - walk local slices/replicas into a listing
//! 2. **detect** - exchange listings with peers (push, then pull laggards)
//! 3. **fix-local** - move local slices sitting on the wrong mountpath
//! 4. **fix-global** - reconstruct and resend missing slices in bounded
//!    batches, driven by the slice-arrival waiter registry
//! 5. **cleanup** - drop collected state and wait for peers

use crate::cluster::hrw_target_list;
use crate::ec::{slice_size, EcMeta, SliceCodec, WaitRegistry};
use crate::error::Result;
use crate::fs::{walk, ContentType};
use crate::reb::stage::Stage;
use crate::reb::{RebManager, RunArgs};
use crate::transport::{ObjFrame, ObjHdr, Payload, SendCtx};
use crate::types::{Bck, NodeId, ObjAttrs, Provider};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One slice/replica descriptor, as exchanged between targets during the
/// detect phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebCt {
    pub bck: Bck,
    pub objname: String,
    pub slice_id: u16,
    pub obj_size: i64,
    pub data_slices: usize,
    pub parity_slices: usize,
    pub is_copy: bool,
    pub obj_cksum: String,
    /// Target currently holding this CT.
    pub host: NodeId,
    /// Local location; meaningless outside the owning target.
    #[serde(skip)]
    pub fqn: Option<PathBuf>,
    /// Local sidecar location; meaningless outside the owning target.
    #[serde(skip)]
    pub meta_fqn: Option<PathBuf>,
}

impl RebCt {
    pub fn uid(&self) -> String {
        self.bck.uname(&self.objname)
    }
}

/// An object scheduled for global EC repair.
#[derive(Debug, Clone)]
pub(crate) struct RebObject {
    pub uid: String,
    pub bck: Bck,
    pub objname: String,
    pub obj_size: i64,
    pub data_slices: usize,
    pub parity_slices: usize,
    pub obj_cksum: String,
    /// Slice ordinals that exist nowhere in the cluster.
    pub missing: Vec<u16>,
}

/// Collected EC rebalance state for the current run.
#[derive(Default)]
pub struct EcRebState {
    /// Listings received from peers, by node.
    node_data: Mutex<HashMap<NodeId, Vec<RebCt>>>,
    /// Local slices/replicas collected by the namespace walk.
    local_cts: Mutex<Vec<RebCt>>,
    /// Local slices found on the wrong mountpath.
    pub(crate) local_actions: Mutex<Vec<RebCt>>,
    /// Objects requiring reconstruction/resend, in batch order.
    pub(crate) broken: Mutex<Vec<RebObject>>,
    /// Objects that could not be restored (insufficient slices).
    pub(crate) unrecovered: AtomicUsize,
    /// Slice-arrival waiters for the in-flight batch.
    pub waiter: WaitRegistry,
    pub(crate) batch_curr: AtomicI64,
    pub(crate) batch_last: AtomicI64,
}

impl EcRebState {
    pub fn has_node_data(&self, node: NodeId) -> bool {
        self.node_data.lock().contains_key(&node)
    }

    pub fn set_node_data(&self, node: NodeId, cts: Vec<RebCt>) {
        self.node_data.lock().insert(node, cts);
    }

    pub fn local_listing(&self) -> Vec<RebCt> {
        self.local_cts.lock().clone()
    }

    pub fn unrecovered_count(&self) -> usize {
        self.unrecovered.load(Ordering::Relaxed)
    }

    pub(crate) fn cleanup(&self) {
        self.node_data.lock().clear();
        self.local_cts.lock().clear();
        self.local_actions.lock().clear();
        self.broken.lock().clear();
        self.waiter.cleanup();
        self.batch_curr.store(0, Ordering::Relaxed);
        self.batch_last.store(0, Ordering::Relaxed);
    }
}

impl RebManager {
    /// The full EC pipeline; runs alongside the regular joggers.
    pub(crate) async fn run_ec_rebalance(self: &Arc<Self>, md: &Arc<RunArgs>) -> Result<()> {
        // collect all local slices
        let cnt = self.build_ec_namespace(md).await;
        if cnt != 0 {
            return Err(crate::error::TalusError::Internal(format!(
                "{} targets failed to build namespace",
                cnt
            )));
        }
        self.distribute_ec_namespace(md).await?;
        self.generate_ec_fix_list(md);
        self.ec_fix_local(md).await?;
        self.ec_fix_global(md).await?;
        info!(id = md.id, "EC rebalance done");
        Ok(())
    }

    /// Walk local `ec/` and `mt/` content into the run's listing.
    async fn build_ec_namespace(self: &Arc<Self>, md: &Arc<RunArgs>) -> usize {
        let mut cts = Vec::new();
        for mpath in &md.paths.available {
            for provider in [Provider::Native, Provider::Cloud] {
                let buckets = match crate::fs::list_buckets(mpath, provider) {
                    Ok(b) => b,
                    Err(e) => {
                        warn!(mpath = %mpath.path.display(), "bucket listing failed: {}", e);
                        continue;
                    }
                };
                for bucket in buckets {
                    let bck = Bck::new(bucket, provider, crate::types::Namespace::global());
                    let mut on_meta = |path: &std::path::Path| -> Result<()> {
                        if self.aborted() {
                            return Err(crate::error::TalusError::Aborted("ec walk".into()));
                        }
                        let meta = EcMeta::load(path)?;
                        let rel = path
                            .strip_prefix(mpath.bucket_dir(&bck, ContentType::Meta))
                            .map_err(|_| {
                                crate::error::TalusError::InvalidFqn(path.display().to_string())
                            })?;
                        let rel = rel.to_string_lossy();
                        // sidecar names carry the slice ordinal
                        let Some((objname, slice_id)) = crate::fs::split_slice_name(&rel) else {
                            warn!(path = %path.display(), "sidecar without ordinal suffix, skipping");
                            return Ok(());
                        };
                        if slice_id != meta.slice_id {
                            warn!(
                                path = %path.display(),
                                name = slice_id,
                                meta = meta.slice_id,
                                "sidecar ordinal mismatch, skipping"
                            );
                            return Ok(());
                        }
                        let fqn = if meta.slice_id == 0 {
                            mpath.fqn(&bck, ContentType::Object, objname)
                        } else {
                            mpath.slice_fqn(&bck, ContentType::Slice, objname, meta.slice_id)
                        };
                        cts.push(RebCt {
                            bck: bck.clone(),
                            objname: objname.to_string(),
                            slice_id: meta.slice_id,
                            obj_size: meta.obj_size,
                            data_slices: meta.data_slices,
                            parity_slices: meta.parity_slices,
                            is_copy: meta.is_copy,
                            obj_cksum: meta.obj_cksum,
                            host: self.self_id,
                            fqn: Some(fqn),
                            meta_fqn: Some(path.to_path_buf()),
                        });
                        Ok(())
                    };
                    if let Err(e) = walk(mpath, &bck, ContentType::Meta, &mut on_meta) {
                        if self.aborted() {
                            return 0;
                        }
                        warn!(bck = %bck, "ec namespace walk failed: {}", e);
                    }
                }
            }
        }
        info!(slices = cts.len(), "local EC namespace built");
        *self.ec.local_cts.lock() = cts;
        self.change_stage(md, Stage::EcNamespace, 0).await;

        if self.wait_for_push_reqs(md, Stage::EcNamespace, None).await {
            return 0;
        }
        let m = Arc::clone(self);
        m.bcast(md, |m, tsi, md| async move {
            m.wait_stage(&tsi, &md, Stage::EcNamespace).await
        })
        .await
    }

    /// Push the local listing to every peer, then pull from laggards.
    async fn distribute_ec_namespace(self: &Arc<Self>, md: &Arc<RunArgs>) -> Result<()> {
        const DISTRIBUTE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(300);
        let listing = self.ec.local_listing();
        for tsi in md.smap.tmap.values() {
            if tsi.id == self.self_id {
                continue;
            }
            if let Err(e) = self.push_ec_namespace(tsi, &listing).await {
                debug!(peer = %tsi, "namespace push failed (peer will pull): {}", e);
            }
        }
        self.change_stage(md, Stage::EcDetect, 0).await;

        if self
            .wait_for_push_reqs(md, Stage::EcDetect, Some(DISTRIBUTE_TIMEOUT))
            .await
        {
            return Ok(());
        }
        let cnt = self
            .bcast(md, |m, tsi, md| async move { m.wait_ec_data(tsi, md).await })
            .await;
        if cnt != 0 {
            return Err(crate::error::TalusError::Internal(format!(
                "{} nodes failed to send their data",
                cnt
            )));
        }
        Ok(())
    }

    /// Detect misplaced local slices and objects missing slices cluster-wide.
    fn generate_ec_fix_list(self: &Arc<Self>, md: &Arc<RunArgs>) {
        // group every known CT by object uid
        let mut by_obj: HashMap<String, Vec<RebCt>> = HashMap::new();
        for ct in self.ec.local_cts.lock().iter() {
            by_obj.entry(ct.uid()).or_default().push(ct.clone());
        }
        {
            let node_data = self.ec.node_data.lock();
            for cts in node_data.values() {
                for ct in cts {
                    by_obj.entry(ct.uid()).or_default().push(ct.clone());
                }
            }
        }

        let mut local_actions = Vec::new();
        let mut broken = Vec::new();
        for (uid, cts) in by_obj {
            let sample = &cts[0];
            let total = sample.data_slices + sample.parity_slices;

            // local slices on the wrong mountpath migrate locally
            for ct in cts.iter().filter(|c| c.host == self.self_id) {
                if let Some(fqn) = &ct.fqn {
                    let want = self.mpath_for(&uid, &md.paths);
                    if !fqn.starts_with(&want.path) {
                        local_actions.push(ct.clone());
                    }
                }
            }

            // the main target collects what exists and schedules repair
            let Ok(tlist) = hrw_target_list(&uid, &md.smap, total + 1) else {
                continue;
            };
            if tlist[0].id != self.self_id {
                continue;
            }
            let mut present: Vec<u16> = cts.iter().map(|c| c.slice_id).collect();
            present.sort_unstable();
            present.dedup();
            let missing: Vec<u16> = (1..=total as u16)
                .filter(|sid| !present.contains(sid))
                .collect();
            let has_full = present.contains(&0);
            if missing.is_empty() || (sample.is_copy && has_full) {
                continue;
            }
            broken.push(RebObject {
                uid,
                bck: sample.bck.clone(),
                objname: sample.objname.clone(),
                obj_size: sample.obj_size,
                data_slices: sample.data_slices,
                parity_slices: sample.parity_slices,
                obj_cksum: sample.obj_cksum.clone(),
                missing,
            });
        }
        // deterministic batch order
        broken.sort_by(|a, b| a.uid.cmp(&b.uid));

        info!(
            misplaced = local_actions.len(),
            broken = broken.len(),
            "EC fix lists generated"
        );
        let batches = broken.len().div_ceil(self.config.ec.batch_size.max(1));
        self.ec.batch_last.store(batches as i64, Ordering::Relaxed);
        *self.ec.local_actions.lock() = local_actions;
        *self.ec.broken.lock() = broken;
    }

    /// Move misplaced local slices to their correct mountpaths.
    async fn ec_fix_local(self: &Arc<Self>, md: &Arc<RunArgs>) -> Result<()> {
        let actions = {
            let mut guard = self.ec.local_actions.lock();
            std::mem::take(&mut *guard)
        };
        for ct in actions {
            if self.aborted() {
                return Err(crate::error::TalusError::Aborted("ec fix-local".into()));
            }
            let Some(src) = &ct.fqn else { continue };
            let uid = ct.uid();
            let want = self.mpath_for(&uid, &md.paths);
            let dst = if ct.slice_id == 0 {
                want.fqn(&ct.bck, ContentType::Object, &ct.objname)
            } else {
                want.slice_fqn(&ct.bck, ContentType::Slice, &ct.objname, ct.slice_id)
            };
            if let Some(parent) = dst.parent() {
                std::fs::create_dir_all(parent)?;
            }
            if let Err(e) = std::fs::rename(src, &dst) {
                warn!(uid = %uid, "local slice migration failed: {}", e);
                continue;
            }
            // the sidecar travels with its slice
            if let Some(msrc) = &ct.meta_fqn {
                let mdst = want.slice_fqn(&ct.bck, ContentType::Meta, &ct.objname, ct.slice_id);
                if let Some(parent) = mdst.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                if let Err(e) = std::fs::rename(msrc, &mdst) {
                    warn!(uid = %uid, "sidecar migration failed: {}", e);
                }
            }
            debug!(uid = %uid, slice = ct.slice_id, "slice migrated to correct mountpath");
        }
        self.change_stage(md, Stage::EcGlobRepair, 0).await;

        let m = Arc::clone(self);
        let cnt = m
            .bcast(md, |m, tsi, md| async move {
                m.wait_stage(&tsi, &md, Stage::EcGlobRepair).await
            })
            .await;
        if cnt != 0 {
            return Err(crate::error::TalusError::Internal(format!(
                "{} targets failed to complete local rebalance",
                cnt
            )));
        }
        Ok(())
    }

    /// Redistribute misplaced slices, reconstruct lost ones, in bounded
    /// batches. Waiters track the slices expected to *arrive* here; the EC
    /// receive handler flags them.
    async fn ec_fix_global(self: &Arc<Self>, md: &Arc<RunArgs>) -> Result<()> {
        // slices this target holds on behalf of another HRW owner get resent
        self.resend_misplaced(md).await?;
        // slices that should land here get a waiter each
        let expected = self.expected_inbound(md);
        for (uid, sid) in &expected {
            self.ec
                .waiter
                .lookup_create(uid, *sid as i16, crate::ec::WaitMode::SingleSlice);
        }

        let broken = self.ec.broken.lock().clone();
        let batch_size = self.config.ec.batch_size.max(1);
        let mut uids: Vec<String> = broken.iter().map(|o| o.uid.clone()).collect();
        let extra: Vec<String> = expected
            .iter()
            .map(|(uid, _)| uid.clone())
            .filter(|uid| !uids.contains(uid))
            .collect();
        uids.extend(extra);

        for (batch_idx, batch) in broken.chunks(batch_size).enumerate() {
            if self.aborted() {
                return Err(crate::error::TalusError::Aborted("ec fix-global".into()));
            }
            self.ec
                .batch_curr
                .store(batch_idx as i64 + 1, Ordering::Relaxed);
            self.change_stage(md, Stage::EcBatches, batch_idx as i64 + 1)
                .await;

            for obj in batch {
                if let Err(e) = self.repair_object(md, obj).await {
                    warn!(uid = %obj.uid, "reconstruction failed: {}", e);
                    self.ec.unrecovered.fetch_add(1, Ordering::Relaxed);
                }
            }
            self.wait_batch_settled(md).await;
            // free this batch's waiters
            let first = batch_idx * batch_size;
            self.ec
                .waiter
                .cleanup_batch(&uids, (first + batch.len()).min(uids.len()));
        }
        // no broken objects: still wait for inbound slices to settle
        if broken.is_empty() && !expected.is_empty() {
            self.wait_batch_settled(md).await;
        }
        self.change_stage(md, Stage::EcCleanup, 0).await;
        self.ec.waiter.cleanup();

        let m = Arc::clone(self);
        let cnt = m
            .bcast(md, |m, tsi, md| async move {
                m.wait_stage(&tsi, &md, Stage::EcCleanup).await
            })
            .await;
        if cnt != 0 {
            return Err(crate::error::TalusError::Internal(format!(
                "{} targets failed to complete EC cleanup",
                cnt
            )));
        }
        Ok(())
    }

    /// Proper owner of a CT slot under the run's cluster map, when the
    /// cluster is large enough to place it.
    fn slot_owner<'a>(
        &self,
        md: &'a Arc<RunArgs>,
        uid: &str,
        slice_id: u16,
        total: usize,
    ) -> Option<&'a crate::cluster::Snode> {
        let tlist = hrw_target_list(uid, &md.smap, total + 1).ok()?;
        tlist.into_iter().nth(slice_id as usize)
    }

    /// Send local slices whose HRW slot owner is another target.
    async fn resend_misplaced(self: &Arc<Self>, md: &Arc<RunArgs>) -> Result<()> {
        let cts = self.ec.local_listing();
        for ct in cts {
            if self.aborted() {
                return Err(crate::error::TalusError::Aborted("ec resend".into()));
            }
            let uid = ct.uid();
            let total = ct.data_slices + ct.parity_slices;
            let Some(owner) = self.slot_owner(md, &uid, ct.slice_id, total) else {
                continue;
            };
            if owner.id == self.self_id {
                continue;
            }
            let Some(fqn) = &ct.fqn else { continue };
            let Ok(payload) = std::fs::read(fqn) else {
                warn!(uid = %uid, slice = ct.slice_id, "unreadable slice, skipping");
                continue;
            };
            let meta = EcMeta {
                obj_size: ct.obj_size,
                data_slices: ct.data_slices,
                parity_slices: ct.parity_slices,
                is_copy: ct.is_copy,
                obj_cksum: ct.obj_cksum.clone(),
                slice_id: ct.slice_id,
            };
            let hdr = ObjHdr {
                bck: ct.bck.clone(),
                objname: ct.objname.clone(),
                opaque: meta.encode().into_bytes(),
                attrs: ObjAttrs {
                    size: payload.len() as i64,
                    atime: 0,
                    version: String::new(),
                    cksum_type: crate::types::Checksum::XXH3.to_string(),
                    cksum_value: crate::types::Checksum::xxh3(&payload).value,
                },
            };
            let manager = Arc::clone(self);
            let frame = ObjFrame::new(hdr, Payload::Bytes(bytes::Bytes::from(payload)))
                .with_ctx(SendCtx::EcSlice {
                    uid: uid.clone(),
                    slice_id: ct.slice_id,
                })
                .with_callback(Arc::new(move |hdr, ctx, res| {
                    if let SendCtx::EcSlice { uid, slice_id } = &ctx {
                        match res {
                            Ok(()) => manager.stats.add_tx(hdr.attrs.size),
                            Err(e) => {
                                warn!(uid = %uid, slice = slice_id, "slice send failed: {}", e)
                            }
                        }
                    }
                }));
            if let Some(bundle) = self.ec_bundle() {
                bundle.send(owner, frame).await?;
                self.laterx.store(true, Ordering::Release);
            }
        }
        Ok(())
    }

    /// Slices hosted elsewhere whose HRW slot owner is this target.
    fn expected_inbound(self: &Arc<Self>, md: &Arc<RunArgs>) -> Vec<(String, u16)> {
        let mut expected = Vec::new();
        let node_data = self.ec.node_data.lock();
        let mut seen = std::collections::HashSet::new();
        for cts in node_data.values() {
            for ct in cts {
                if ct.host == self.self_id {
                    continue;
                }
                let uid = ct.uid();
                if !seen.insert((uid.clone(), ct.slice_id)) {
                    continue;
                }
                let total = ct.data_slices + ct.parity_slices;
                if let Some(owner) = self.slot_owner(md, &uid, ct.slice_id, total) {
                    if owner.id == self.self_id {
                        expected.push((uid, ct.slice_id));
                    }
                }
            }
        }
        expected
    }

    /// Poll until this batch's inbound slices arrived (outstanding drained),
    /// every peer pushed the batch, or the retry ceiling expires.
    async fn wait_batch_settled(self: &Arc<Self>, md: &Arc<RunArgs>) {
        let sleep = self.config.timeout.cplane_operation;
        let maxwt = self.config.rebalance.dest_retry_time;
        let mut curwt = std::time::Duration::ZERO;
        let batch = self.ec.batch_curr.load(Ordering::Relaxed);
        let peer_ids: Vec<_> = md
            .smap
            .tmap
            .keys()
            .copied()
            .filter(|&id| id != self.self_id)
            .collect();
        while curwt < maxwt {
            if self.ec.waiter.outstanding() == 0 {
                return;
            }
            let all_pushed = peer_ids
                .iter()
                .all(|&id| self.stages.is_in_stage_batch(id, Stage::EcBatches, batch));
            if all_pushed {
                return;
            }
            if self.aborted_after(sleep).await {
                return;
            }
            curwt += sleep;
        }
        warn!(batch, outstanding = self.ec.waiter.outstanding(), "batch timed out");
    }

    /// Rebuild one object's missing slices from whatever survives locally
    /// and redistribute them to their HRW owners.
    async fn repair_object(self: &Arc<Self>, md: &Arc<RunArgs>, obj: &RebObject) -> Result<()> {
        let total = obj.data_slices + obj.parity_slices;
        let ssize = slice_size(obj.obj_size, obj.data_slices);

        // load surviving slices; the full object short-circuits everything
        let mut slices: Vec<Option<Vec<u8>>> = vec![None; total];
        let full_fqn = self
            .mpath_for(&obj.uid, &md.paths)
            .fqn(&obj.bck, ContentType::Object, &obj.objname);
        let full = std::fs::read(&full_fqn).ok();

        let data = if let Some(full) = full {
            full
        } else {
            for ct in self.ec.local_cts.lock().iter() {
                if ct.uid() != obj.uid || ct.slice_id == 0 {
                    continue;
                }
                if let Some(fqn) = &ct.fqn {
                    if let Ok(bytes) = std::fs::read(fqn) {
                        let idx = (ct.slice_id - 1) as usize;
                        if idx < total {
                            slices[idx] = Some(bytes);
                        }
                    }
                }
            }
            let have = slices.iter().filter(|s| s.is_some()).count();
            if have < obj.data_slices {
                return Err(crate::error::TalusError::InsufficientSlices {
                    have,
                    need: obj.data_slices,
                });
            }
            let codec = SliceCodec::new(obj.data_slices, obj.parity_slices)?;
            codec.decode(&mut slices, obj.obj_size)?
        };

        // re-encode and send the missing slices to their owners; a spilled
        // buffer handles the pathological large-object case
        let mut working = self.mem.slice_writer(obj.obj_size)?;
        working.write_all(&data)?;
        let data = working.into_bytes()?;
        let codec = SliceCodec::new(obj.data_slices, obj.parity_slices)?;
        let encoded = codec.encode(&data)?;
        let tlist = hrw_target_list(&obj.uid, &md.smap, total + 1)?;

        for &sid in &obj.missing {
            let Some(owner) = tlist.get(sid as usize).copied() else {
                // cluster too small to place this slot
                continue;
            };
            let payload = encoded[(sid - 1) as usize].clone();
            let meta = EcMeta {
                obj_size: obj.obj_size,
                data_slices: obj.data_slices,
                parity_slices: obj.parity_slices,
                is_copy: false,
                obj_cksum: obj.obj_cksum.clone(),
                slice_id: sid,
            };
            if owner.id == self.self_id {
                // our own slice lands directly on the correct mountpath
                let mpath = self.mpath_for(&obj.uid, &md.paths);
                let fqn = mpath.slice_fqn(&obj.bck, ContentType::Slice, &obj.objname, sid);
                if let Some(parent) = fqn.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&fqn, &payload)?;
                meta.store(&mpath.slice_fqn(&obj.bck, ContentType::Meta, &obj.objname, sid))?;
                continue;
            }
            let hdr = ObjHdr {
                bck: obj.bck.clone(),
                objname: obj.objname.clone(),
                opaque: meta.encode().into_bytes(),
                attrs: ObjAttrs {
                    size: ssize,
                    atime: 0,
                    version: String::new(),
                    cksum_type: crate::types::Checksum::XXH3.to_string(),
                    cksum_value: crate::types::Checksum::xxh3(&payload).value,
                },
            };
            let manager = Arc::clone(self);
            let frame = ObjFrame::new(hdr, Payload::Bytes(bytes::Bytes::from(payload)))
                .with_ctx(SendCtx::EcSlice {
                    uid: obj.uid.clone(),
                    slice_id: sid,
                })
                .with_callback(Arc::new(move |hdr, ctx, res| {
                    if let SendCtx::EcSlice { uid, slice_id } = &ctx {
                        match res {
                            Ok(()) => manager.stats.add_tx(hdr.attrs.size),
                            Err(e) => {
                                warn!(uid = %uid, slice = slice_id, "slice send failed: {}", e)
                            }
                        }
                    }
                }));
            if let Some(bundle) = self.ec_bundle() {
                bundle.send(owner, frame).await?;
                self.laterx.store(true, Ordering::Release);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reb_ct_uid() {
        let ct = RebCt {
            bck: Bck::native("bck1"),
            objname: "obj1".to_string(),
            slice_id: 2,
            obj_size: 100,
            data_slices: 4,
            parity_slices: 2,
            is_copy: false,
            obj_cksum: "ff".to_string(),
            host: 3,
            fqn: None,
            meta_fqn: None,
        };
        assert_eq!(ct.uid(), "native/@/bck1/obj1");
    }

    #[test]
    fn test_node_data_roundtrip() {
        let state = EcRebState::default();
        assert!(!state.has_node_data(2));
        state.set_node_data(2, Vec::new());
        assert!(state.has_node_data(2));
        state.cleanup();
        assert!(!state.has_node_data(2));
        assert_eq!(state.waiter.outstanding(), 0);
    }
}

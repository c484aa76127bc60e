//! Mountpath joggers: enumerate local objects and stream the misplaced ones
//! to their HRW owners.
//!
//! One jogger per (mountpath x provider). The filesystem walk runs on a
//! blocking thread and feeds a bounded channel; the async side applies the
//! GFN short-circuit, takes the object read lock, and pushes frames through
//! the data bundle. Per-mountpath send concurrency is capped by a semaphore
//! of `rebalance.multiplier` permits.

use crate::cluster::hrw_target;
use crate::fs::{ContentType, Mountpath};
use crate::lom::Lom;
use crate::reb::ack::RegularAck;
use crate::reb::{RebManager, RunArgs};
use crate::transport::{ObjFrame, ObjHdr, Payload, SendCtx};
use crate::types::{Bck, Provider};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

const WALK_CHANNEL_DEPTH: usize = 1024;

impl RebManager {
    /// Run all joggers for the traverse stage; returns when every mountpath
    /// walk and every outstanding send has finished.
    pub(crate) async fn run_joggers(self: &Arc<Self>, md: &Arc<RunArgs>) -> crate::error::Result<()> {
        let mut handles = Vec::new();
        for mpath in &md.paths.available {
            for provider in [Provider::Native, Provider::Cloud] {
                let m = Arc::clone(self);
                let md = Arc::clone(md);
                let mpath = mpath.clone();
                handles.push(tokio::spawn(async move {
                    m.jog(md, mpath, provider).await;
                }));
            }
        }
        for handle in handles {
            let _ = handle.await;
        }
        if self.aborted() {
            return Err(crate::error::TalusError::Aborted(format!(
                "g{}: traversal",
                md.id
            )));
        }
        debug!(id = md.id, "finished rebalance walk");
        Ok(())
    }

    async fn jog(self: Arc<Self>, md: Arc<RunArgs>, mpath: Mountpath, provider: Provider) {
        let (tx, mut rx) = mpsc::channel::<Lom>(WALK_CHANNEL_DEPTH);

        // filesystem walk on a blocking thread
        let walker = {
            let m = Arc::clone(&self);
            let md = Arc::clone(&md);
            let mpath = mpath.clone();
            tokio::task::spawn_blocking(move || m.walk_mountpath(&md, &mpath, provider, tx))
        };

        // bounded-concurrency send loop
        let sema = Arc::new(Semaphore::new(self.config.rebalance.multiplier.max(1)));
        let mut sends = Vec::new();
        while let Some(lom) = rx.recv().await {
            if self.aborted() {
                break;
            }
            let permit = match Arc::clone(&sema).acquire_owned().await {
                Ok(p) => p,
                Err(_) => break,
            };
            let m = Arc::clone(&self);
            let md = Arc::clone(&md);
            sends.push(tokio::spawn(async move {
                let _permit = permit;
                if let Err(e) = m.send_object(&md, lom).await {
                    if !e.is_fatal_for_run() {
                        debug!("send skipped: {}", e);
                    }
                }
            }));
        }
        for send in sends {
            let _ = send.await;
        }
        if let Err(e) = walker.await {
            warn!(mpath = %mpath.path.display(), "walker panicked: {}", e);
        }
    }

    /// Synchronous walk callback side: enumerate objects, skip the ones that
    /// stay, queue the rest for sending.
    fn walk_mountpath(
        self: Arc<Self>,
        md: &Arc<RunArgs>,
        mpath: &Mountpath,
        provider: Provider,
        tx: mpsc::Sender<Lom>,
    ) {
        let buckets = match crate::fs::list_buckets(mpath, provider) {
            Ok(b) => b,
            Err(e) => {
                warn!(mpath = %mpath.path.display(), "bucket listing failed: {}", e);
                return;
            }
        };
        for bucket in buckets {
            let bck = Bck::new(bucket, provider, crate::types::Namespace::global());
            if md.ec_used && self.config.ec.enabled {
                // EC-enabled buckets belong to the EC pipeline
                continue;
            }
            let mut cb = |path: &std::path::Path| -> crate::error::Result<()> {
                if self.aborted() {
                    return Err(crate::error::TalusError::Aborted("traversal".into()));
                }
                // a newer cluster map invalidates the whole run
                let nver = self.cluster_smap_version();
                if nver > md.smap.version {
                    self.abort_local(format!("smap v{} < v{}", md.smap.version, nver));
                    return Err(crate::error::TalusError::NewerEpoch {
                        have: md.smap.version,
                        seen: nver,
                    });
                }
                let lom = match Lom::from_fqn(path, &md.paths) {
                    Ok(lom) => lom,
                    Err(e) => {
                        debug!(path = %path.display(), "skipping: {}", e);
                        return Ok(());
                    }
                };
                let uname = lom.uname();
                let tsi = hrw_target(&uname, &md.smap)?;
                if tsi.id == self.self_id {
                    return Ok(());
                }
                // objects just pulled through GFN are not re-migrated
                if self.gfn.lookup(uname.as_bytes()) {
                    self.gfn.delete(uname.as_bytes());
                    return Ok(());
                }
                if tx.blocking_send(lom).is_err() {
                    return Err(crate::error::TalusError::Aborted("send queue closed".into()));
                }
                Ok(())
            };
            if let Err(e) = crate::fs::walk(mpath, &bck, ContentType::Object, &mut cb) {
                if self.aborted() {
                    info!("aborting traversal");
                    return;
                }
                warn!(bck = %bck, "traversal failed: {}", e);
            }
        }
    }

    /// Send one object to its HRW owner: read-lock, checksum, optimistic ack
    /// entry, then hand the frame to the data bundle. The completion
    /// callback releases the lock and settles stats.
    pub(crate) async fn send_object(
        self: &Arc<Self>,
        md: &Arc<RunArgs>,
        mut lom: Lom,
    ) -> crate::error::Result<()> {
        let uname = lom.uname();
        let tsi = hrw_target(&uname, &md.smap)?.clone();

        let guard = self.locker.rlock(&uname);
        if let Err(e) = lom.load() {
            drop(guard);
            return Err(e);
        }
        if let Err(e) = lom.cksum_compute_if_missing() {
            // unreadable object: skip it for this run
            drop(guard);
            warn!(obj = %lom, "checksum failed: {}", e);
            return Err(e);
        }

        // optimistic: pending-ack before the wire write
        self.lom_acks
            .insert(lom.clone(), tsi.id, std::time::Instant::now());

        let ack = RegularAck {
            glob_reb_id: md.id,
            daemon_id: self.self_id,
        };
        let hdr = ObjHdr {
            bck: lom.bck.clone(),
            objname: lom.objname.clone(),
            opaque: ack.pack(),
            attrs: lom.attrs(),
        };
        let manager = Arc::clone(self);
        let frame = ObjFrame::new(hdr, Payload::File(lom.fqn.clone()))
            .with_ctx(SendCtx::RebSend {
                uname: uname.clone(),
                guard: Some(guard),
            })
            .with_callback(Arc::new(move |hdr, ctx, res| {
                // the guard inside ctx drops here - the object unlocks
                if let SendCtx::RebSend { uname, .. } = &ctx {
                    match res {
                        Ok(()) => manager.stats.add_tx(hdr.attrs.size),
                        Err(e) => {
                            warn!(obj = %uname, "send failed: {}", e);
                            manager.lom_acks.remove(uname);
                        }
                    }
                }
            }));

        let bundle = self
            .data_bundle()
            .ok_or(crate::error::TalusError::StreamClosed)?;
        match bundle.send(&tsi, frame).await {
            Ok(()) => {
                self.laterx.store(true, Ordering::Release);
                Ok(())
            }
            Err(e) => {
                self.lom_acks.remove(&uname);
                Err(e)
            }
        }
    }
}

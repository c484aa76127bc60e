//! Inbound frame handlers: rebalanced objects, ack echoes, EC slices.

use crate::ec::EcMeta;
use crate::fs::ContentType;
use crate::lom::Lom;
use crate::reb::ack::RegularAck;
use crate::reb::RebManager;
use crate::transport::{ObjFrame, ObjHdr, Payload, ReceiveHandler, SendCtx};
use crate::types::ObjAttrs;
use bytes::Bytes;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, warn};

pub(crate) const TRANS_DATA: &str = "reb";
pub(crate) const TRANS_ACK: &str = "reb-ack";
pub(crate) const TRANS_EC: &str = "ec";

struct DataHandler {
    manager: Arc<RebManager>,
}

impl ReceiveHandler for DataHandler {
    fn on_frame(&self, hdr: ObjHdr, payload: Bytes) -> crate::error::Result<()> {
        let m = &self.manager;
        let uname = hdr.uname();
        let token = RegularAck::unpack(&hdr.opaque)?;

        {
            let mpaths = m.run_mpaths();
            let mpath = m.mpath_for(&uname, &mpaths);
            let guard = m.locker.wlock(&uname);
            let mut lom = Lom::place(hdr.bck.clone(), &hdr.objname, &mpath);
            let res = lom.persist(&payload);
            guard.unlock();
            res?;
        }
        m.stats.add_rx(hdr.attrs.size);
        m.laterx.store(true, Ordering::Release);
        debug!(obj = %uname, from = token.daemon_id, "object received");

        // echo the ack token back on the small-frame stream
        let manager = Arc::clone(m);
        tokio::spawn(async move {
            manager.echo_ack(token, hdr).await;
        });
        Ok(())
    }
}

struct AckHandler {
    manager: Arc<RebManager>,
}

impl ReceiveHandler for AckHandler {
    fn on_frame(&self, hdr: ObjHdr, _payload: Bytes) -> crate::error::Result<()> {
        let m = &self.manager;
        let token = RegularAck::unpack(&hdr.opaque)?;
        if token.glob_reb_id != m.glob_reb_id.load(Ordering::Acquire) {
            debug!(
                id = token.glob_reb_id,
                "stale ack generation - ignoring"
            );
            return Ok(());
        }
        let uname = hdr.uname();
        if let Some(entry) = m.lom_acks.remove(&uname) {
            // the object now lives on its HRW target; drop the source copy
            let guard = m.locker.wlock(&uname);
            let res = entry.lom.delete();
            guard.unlock();
            if let Err(e) = res {
                warn!(obj = %uname, "source cleanup failed: {}", e);
            }
            debug!(obj = %uname, "acked");
        }
        m.laterx.store(true, Ordering::Release);
        Ok(())
    }
}

struct EcHandler {
    manager: Arc<RebManager>,
}

impl ReceiveHandler for EcHandler {
    fn on_frame(&self, hdr: ObjHdr, payload: Bytes) -> crate::error::Result<()> {
        let m = &self.manager;
        let meta = EcMeta::decode(std::str::from_utf8(&hdr.opaque).map_err(|_| {
            crate::error::TalusError::InvalidSliceMeta("opaque not utf-8".to_string())
        })?)?;
        let uname = hdr.uname();
        let mpaths = m.run_mpaths();
        let mpath = m.mpath_for(&uname, &mpaths);
        // ordinal 0 is a full replica; real slices land under their ordinal
        let fqn = if meta.slice_id == 0 {
            mpath.fqn(&hdr.bck, ContentType::Object, &hdr.objname)
        } else {
            mpath.slice_fqn(&hdr.bck, ContentType::Slice, &hdr.objname, meta.slice_id)
        };
        if let Some(parent) = fqn.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&fqn, &payload)?;
        meta.store(&mpath.slice_fqn(&hdr.bck, ContentType::Meta, &hdr.objname, meta.slice_id))?;

        m.ec.waiter.mark_arrived(&uname, meta.slice_id as i16);
        m.stats.add_rx(hdr.attrs.size);
        m.laterx.store(true, Ordering::Release);
        debug!(obj = %uname, slice = meta.slice_id, "slice received");
        Ok(())
    }
}

impl RebManager {
    /// Install the inbound handlers; once per process.
    pub fn install_handlers(self: &Arc<Self>) {
        self.receiver.register(
            TRANS_DATA,
            Arc::new(DataHandler {
                manager: Arc::clone(self),
            }),
        );
        self.receiver.register(
            TRANS_ACK,
            Arc::new(AckHandler {
                manager: Arc::clone(self),
            }),
        );
        self.receiver.register(
            TRANS_EC,
            Arc::new(EcHandler {
                manager: Arc::clone(self),
            }),
        );
    }

    /// Send an ack token back to the original sender.
    pub(crate) async fn echo_ack(self: &Arc<Self>, token: RegularAck, hdr: ObjHdr) {
        let sender = {
            let smap = self.current_smap();
            smap.get_target(token.daemon_id).cloned()
        };
        let Some(sender) = sender else {
            warn!(node = token.daemon_id, "ack destination left the cluster");
            return;
        };
        let ack_hdr = ObjHdr {
            bck: hdr.bck,
            objname: hdr.objname,
            opaque: token.pack(),
            attrs: ObjAttrs {
                size: 0,
                atime: 0,
                version: String::new(),
                cksum_type: String::new(),
                cksum_value: String::new(),
            },
        };
        let frame = ObjFrame::new(ack_hdr, Payload::Empty).with_ctx(SendCtx::AckEcho);
        if let Some(bundle) = self.ack_bundle() {
            if let Err(e) = bundle.send(&sender, frame).await {
                warn!(peer = %sender, "ack echo failed: {}", e);
            }
        }
    }
}

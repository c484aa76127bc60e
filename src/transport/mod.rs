//! Intra-cluster streaming transport.
//!
//! A stream is a long-lived, unidirectional flow of object-framed records
//! from one target to another over a single HTTP PUT. Frames on a stream are
//! delivered FIFO; frames across streams are unordered. Streams idle out and
//! reactivate transparently under the control of the [`StreamCollector`].
//!
//! The sender-side contract is the per-frame completion callback: invoked
//! exactly once per accepted frame, with `Ok(())` after the frame was handed
//! to the wire or an error when the stream terminated first. The callback is
//! the sole release point for the sender's resources (LOM read locks, ack
//! bookkeeping, stats).

mod bundle;
mod collector;
mod frame;
mod receiver;
mod stream;

pub use bundle::StreamBundle;
pub use collector::{CollectorCore, StreamCollector};
pub use frame::{encode_record, FrameDecoder, ObjHdr};
pub use receiver::{ReceiveHandler, ReceiverRegistry};
pub use stream::{SessionState, Stream};

use crate::error::Result;
use crate::lom::RLockGuard;
use bytes::Bytes;
use std::path::PathBuf;
use std::sync::Arc;

/// Tagged completion context: what the frame was carrying, and the resources
/// released when its callback fires.
pub enum SendCtx {
    /// A rebalanced object; the read guard is released by the callback.
    RebSend {
        uname: String,
        guard: Option<RLockGuard>,
    },
    /// An EC slice sent for reconstruction.
    EcSlice { uid: String, slice_id: u16 },
    /// An ack token echoed back to the original sender.
    AckEcho,
    /// No resources attached.
    Raw,
}

impl std::fmt::Debug for SendCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SendCtx::RebSend { uname, .. } => write!(f, "reb-send({})", uname),
            SendCtx::EcSlice { uid, slice_id } => write!(f, "ec-slice({}/{})", uid, slice_id),
            SendCtx::AckEcho => write!(f, "ack-echo"),
            SendCtx::Raw => write!(f, "raw"),
        }
    }
}

/// Frame payload source. Files are read by the stream writer at transmit
/// time so a slow disk never blocks the caller's send.
pub enum Payload {
    Empty,
    Bytes(Bytes),
    File(PathBuf),
}

/// Per-frame completion callback; `(hdr, ctx, result)`.
pub type SendCallback = Arc<dyn Fn(&ObjHdr, SendCtx, Result<()>) + Send + Sync>;

/// One queued frame.
pub struct ObjFrame {
    pub hdr: ObjHdr,
    pub payload: Payload,
    pub ctx: SendCtx,
    pub cb: Option<SendCallback>,
}

impl ObjFrame {
    pub fn new(hdr: ObjHdr, payload: Payload) -> Self {
        Self {
            hdr,
            payload,
            ctx: SendCtx::Raw,
            cb: None,
        }
    }

    pub fn with_ctx(mut self, ctx: SendCtx) -> Self {
        self.ctx = ctx;
        self
    }

    pub fn with_callback(mut self, cb: SendCallback) -> Self {
        self.cb = Some(cb);
        self
    }

    /// Fire the completion callback, consuming the frame.
    pub(crate) fn complete(self, res: Result<()>) {
        if let Some(cb) = self.cb {
            cb(&self.hdr, self.ctx, res);
        }
    }
}

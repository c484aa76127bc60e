//! Receive side: per-trans-name handler registry and the inbound decode loop.

use crate::error::{Result, TalusError};
use crate::transport::frame::{FrameDecoder, ObjHdr};
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Installed once per trans-name (e.g. "reb", "reb-ack", "ec"); invoked per
/// inbound frame. The payload is fully buffered by the decode loop, so the
/// handler owns its bytes.
pub trait ReceiveHandler: Send + Sync + 'static {
    fn on_frame(&self, hdr: ObjHdr, payload: Bytes) -> Result<()>;
}

impl<F> ReceiveHandler for F
where
    F: Fn(ObjHdr, Bytes) -> Result<()> + Send + Sync + 'static,
{
    fn on_frame(&self, hdr: ObjHdr, payload: Bytes) -> Result<()> {
        self(hdr, payload)
    }
}

/// Registry of inbound frame handlers, keyed by trans-name.
pub struct ReceiverRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn ReceiveHandler>>>,
    max_header: usize,
}

impl Default for ReceiverRegistry {
    fn default() -> Self {
        Self::new(4 * 1024)
    }
}

impl ReceiverRegistry {
    pub fn new(max_header: usize) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            max_header,
        }
    }

    pub fn register(&self, trans: impl Into<String>, handler: Arc<dyn ReceiveHandler>) {
        self.handlers.write().insert(trans.into(), handler);
    }

    pub fn unregister(&self, trans: &str) {
        self.handlers.write().remove(trans);
    }

    pub fn lookup(&self, trans: &str) -> Option<Arc<dyn ReceiveHandler>> {
        self.handlers.read().get(trans).cloned()
    }

    /// Decode one inbound stream session and dispatch its frames. Tick
    /// markers are consumed here and never reach the handler. A handler
    /// error aborts the session (the sender sees a non-2xx).
    pub async fn consume<S, E>(&self, trans: &str, session: &str, mut body: S) -> Result<()>
    where
        S: futures::Stream<Item = std::result::Result<Bytes, E>> + Unpin,
        E: std::fmt::Display,
    {
        let handler = self
            .lookup(trans)
            .ok_or_else(|| TalusError::Internal(format!("no handler for trans {:?}", trans)))?;
        let mut dec = FrameDecoder::new(self.max_header);
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| TalusError::Http(e.to_string()))?;
            for (hdr, payload) in dec.feed(&chunk)? {
                if hdr.attrs.is_tick_marker() {
                    continue;
                }
                handler.on_frame(hdr, payload)?;
            }
        }
        if !dec.is_clean() {
            warn!(trans, session, "session ended mid-record");
        }
        Ok(())
    }
}

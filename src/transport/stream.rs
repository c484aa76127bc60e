//! A single outbound stream and its writer task.

use crate::error::{Result, TalusError};
use crate::transport::frame::{encode_record, ObjHdr};
use crate::transport::{ObjFrame, Payload};
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Stream session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Active = 1,
    Inactive = 2,
    Terminated = 3,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => SessionState::Active,
            2 => SessionState::Inactive,
            _ => SessionState::Terminated,
        }
    }
}

pub(crate) const REASON_UNKNOWN: &str = "unknown reason";

/// Work items consumed by the stream writer.
pub(crate) enum WorkItem {
    Obj(ObjFrame),
    /// Idle probe from the collector: flush a tick-marker record and drop the
    /// wire session.
    Tick,
    /// Graceful close.
    Stop(Option<String>),
}

/// Collector-side idle bookkeeping. `ticks` and `index` are written only by
/// the collector thread; the intrusive heap invariant is
/// `heap[time.index] == self`.
pub(crate) struct StreamTime {
    pub ticks: AtomicI64,
    pub index: AtomicUsize,
    pub idle_ticks: i64,
}

pub(crate) struct StreamInner {
    /// Logical stream ID: `sender->receiver/session`.
    pub lid: String,
    pub put_url: String,
    pub sess: AtomicU8,
    /// Frames posted since the collector's last idle check.
    pub posted: AtomicI64,
    /// Frames accepted into the queue and not yet written to the wire.
    pub queued: AtomicI64,
    /// Payload bytes currently being written.
    pub in_flight: AtomicI64,
    pub term_reason: Mutex<Option<String>>,
    pub work_tx: mpsc::Sender<WorkItem>,
    /// The writer parks its receiver here on exit so the collector can drain
    /// left-over frames with the termination error.
    pub work_rx: Mutex<Option<mpsc::Receiver<WorkItem>>>,
    pub time: StreamTime,
}

impl StreamInner {
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.sess.load(Ordering::Acquire))
    }

    pub fn terminate(&self, reason: impl Into<String>) {
        let mut term = self.term_reason.lock();
        if term.is_none() {
            *term = Some(reason.into());
        }
        self.sess.store(SessionState::Terminated as u8, Ordering::Release);
    }

    pub fn term_reason(&self) -> String {
        self.term_reason
            .lock()
            .clone()
            .unwrap_or_else(|| REASON_UNKNOWN.to_string())
    }

    pub fn is_idle(&self) -> bool {
        self.queued.load(Ordering::Acquire) == 0 && self.in_flight.load(Ordering::Acquire) == 0
    }
}

/// Handle to an outbound stream. Cloneable; all clones share one queue and
/// one writer task.
#[derive(Clone)]
pub struct Stream {
    pub(crate) inner: Arc<StreamInner>,
}

impl Stream {
    /// Create the stream and spawn its writer task. The caller is expected
    /// to register the stream with the collector.
    pub(crate) fn spawn(
        lid: String,
        put_url: String,
        idle_ticks: i64,
        queue_depth: usize,
        client: reqwest::Client,
    ) -> Self {
        let (work_tx, work_rx) = mpsc::channel(queue_depth.max(1));
        let inner = Arc::new(StreamInner {
            lid,
            put_url,
            sess: AtomicU8::new(SessionState::Active as u8),
            posted: AtomicI64::new(0),
            queued: AtomicI64::new(0),
            in_flight: AtomicI64::new(0),
            term_reason: Mutex::new(None),
            work_tx,
            work_rx: Mutex::new(None),
            time: StreamTime {
                ticks: AtomicI64::new(idle_ticks),
                index: AtomicUsize::new(0),
                idle_ticks,
            },
        });
        tokio::spawn(run_writer(Arc::clone(&inner), work_rx, client));
        Self { inner }
    }

    /// Test-only: a stream with no writer task; the receiver stays parked so
    /// collector drain paths can be exercised directly.
    #[cfg(test)]
    pub(crate) fn detached(lid: String, idle_ticks: i64, queue_depth: usize) -> Self {
        let (work_tx, work_rx) = mpsc::channel(queue_depth.max(1));
        let inner = Arc::new(StreamInner {
            lid,
            put_url: String::new(),
            sess: AtomicU8::new(SessionState::Active as u8),
            posted: AtomicI64::new(0),
            queued: AtomicI64::new(0),
            in_flight: AtomicI64::new(0),
            term_reason: Mutex::new(None),
            work_tx,
            work_rx: Mutex::new(Some(work_rx)),
            time: StreamTime {
                ticks: AtomicI64::new(idle_ticks),
                index: AtomicUsize::new(0),
                idle_ticks,
            },
        });
        Self { inner }
    }

    pub fn id(&self) -> &str {
        &self.inner.lid
    }

    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    /// True when nothing is queued or being written.
    pub fn is_quiescent(&self) -> bool {
        self.inner.is_idle()
    }

    /// Enqueue a frame. Blocks when the work queue is full (backpressure).
    /// On a terminated stream the frame completes immediately with an error.
    pub async fn send(&self, frame: ObjFrame) -> Result<()> {
        if self.state() == SessionState::Terminated {
            let reason = self.inner.term_reason();
            frame.complete(Err(TalusError::StreamTerminated(reason.clone())));
            return Err(TalusError::StreamTerminated(reason));
        }
        self.inner.posted.fetch_add(1, Ordering::AcqRel);
        // reactivate an idled stream; the writer re-opens the wire session
        let _ = self.inner.sess.compare_exchange(
            SessionState::Inactive as u8,
            SessionState::Active as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.inner.queued.fetch_add(1, Ordering::AcqRel);
        match self.inner.work_tx.send(WorkItem::Obj(frame)).await {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendError(item)) => {
                self.inner.queued.fetch_sub(1, Ordering::AcqRel);
                if let WorkItem::Obj(frame) = item {
                    frame.complete(Err(TalusError::StreamClosed));
                }
                Err(TalusError::StreamClosed)
            }
        }
    }

    /// Graceful close; callers must have no frames in flight. Queued frames
    /// complete with a "terminated" error once the collector reaps the
    /// stream.
    pub async fn fin(&self) {
        let _ = self.inner.work_tx.send(WorkItem::Stop(None)).await;
    }

    pub(crate) fn inner(&self) -> Arc<StreamInner> {
        Arc::clone(&self.inner)
    }
}

struct Wire {
    body_tx: mpsc::Sender<std::io::Result<Bytes>>,
    done: tokio::task::JoinHandle<Result<()>>,
}

async fn open_wire(client: &reqwest::Client, url: &str) -> Wire {
    let (body_tx, body_rx) = mpsc::channel::<std::io::Result<Bytes>>(16);
    let body = reqwest::Body::wrap_stream(tokio_stream::wrappers::ReceiverStream::new(body_rx));
    let req = client.put(url).body(body).send();
    let done = tokio::spawn(async move {
        let resp = req.await.map_err(|e| TalusError::Http(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(TalusError::UnexpectedStatus(resp.status().as_u16()));
        }
        Ok(())
    });
    Wire { body_tx, done }
}

async fn close_wire(wire: Wire, lid: &str) {
    // flush the idle probe so the receiver sees a clean end-of-session
    let marker = encode_record(&ObjHdr::tick_marker(), &[]).expect("tick marker encodes");
    let _ = wire.body_tx.send(Ok(marker)).await;
    drop(wire.body_tx);
    match wire.done.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(stream = lid, "wire session closed with {}", e),
        Err(e) => debug!(stream = lid, "wire task join error: {}", e),
    }
}

async fn load_payload(payload: &Payload) -> Result<Bytes> {
    match payload {
        Payload::Empty => Ok(Bytes::new()),
        Payload::Bytes(b) => Ok(b.clone()),
        Payload::File(path) => {
            let data = tokio::fs::read(path).await?;
            Ok(Bytes::from(data))
        }
    }
}

async fn run_writer(
    inner: Arc<StreamInner>,
    mut work_rx: mpsc::Receiver<WorkItem>,
    client: reqwest::Client,
) {
    let mut wire: Option<Wire> = None;
    loop {
        let item = match work_rx.recv().await {
            Some(item) => item,
            None => break,
        };
        match item {
            WorkItem::Tick => {
                if let Some(w) = wire.take() {
                    close_wire(w, &inner.lid).await;
                    debug!(stream = %inner.lid, "active => inactive");
                }
            }
            WorkItem::Stop(reason) => {
                inner.terminate(reason.unwrap_or_else(|| "stopped".to_string()));
                if let Some(w) = wire.take() {
                    close_wire(w, &inner.lid).await;
                }
                break;
            }
            WorkItem::Obj(frame) => {
                inner.queued.fetch_sub(1, Ordering::AcqRel);
                if inner.state() == SessionState::Terminated {
                    frame.complete(Err(TalusError::StreamTerminated(inner.term_reason())));
                    continue;
                }
                let payload = match load_payload(&frame.payload).await {
                    Ok(b) => b,
                    Err(e) => {
                        frame.complete(Err(e));
                        continue;
                    }
                };
                // an object that changed size since the header was built is
                // rejected, not asserted on
                let expected_size = frame.hdr.attrs.size;
                if expected_size >= 0 && payload.len() as i64 != expected_size {
                    frame.complete(Err(TalusError::SizeMismatch {
                        expected: expected_size,
                        got: payload.len() as i64,
                    }));
                    continue;
                }
                let record = match encode_record(&frame.hdr, &payload) {
                    Ok(r) => r,
                    Err(e) => {
                        frame.complete(Err(e));
                        continue;
                    }
                };
                if wire.is_none() {
                    wire = Some(open_wire(&client, &inner.put_url).await);
                    inner
                        .sess
                        .store(SessionState::Active as u8, Ordering::Release);
                }
                let w = wire.as_ref().expect("wire open");
                inner.in_flight.fetch_add(payload.len() as i64, Ordering::AcqRel);
                let sent = w.body_tx.send(Ok(record)).await;
                inner.in_flight.fetch_sub(payload.len() as i64, Ordering::AcqRel);
                match sent {
                    Ok(()) => frame.complete(Ok(())),
                    Err(_) => {
                        // the request side died underneath us
                        let w = wire.take().expect("wire open");
                        let reason = match w.done.await {
                            Ok(Err(e)) => e.to_string(),
                            Ok(Ok(())) => "peer closed session".to_string(),
                            Err(e) => e.to_string(),
                        };
                        warn!(stream = %inner.lid, "session broken: {}", reason);
                        inner.terminate(reason.clone());
                        frame.complete(Err(TalusError::StreamTerminated(reason)));
                        break;
                    }
                }
            }
        }
    }
    // complete whatever is still queued, then park the receiver; the
    // collector's reap pass catches frames enqueued after this point
    if inner.state() == SessionState::Terminated {
        let reason = inner.term_reason();
        while let Ok(item) = work_rx.try_recv() {
            if let WorkItem::Obj(frame) = item {
                inner.queued.fetch_sub(1, Ordering::AcqRel);
                frame.complete(Err(TalusError::StreamTerminated(reason.clone())));
            }
        }
    }
    *inner.work_rx.lock() = Some(work_rx);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Bck, ObjAttrs};

    fn make_frame(name: &str, body: &'static [u8]) -> ObjFrame {
        ObjFrame::new(
            ObjHdr {
                bck: Bck::native("bck1"),
                objname: name.to_string(),
                opaque: Vec::new(),
                attrs: ObjAttrs {
                    size: body.len() as i64,
                    atime: 0,
                    version: String::new(),
                    cksum_type: String::new(),
                    cksum_value: String::new(),
                },
            },
            Payload::Bytes(Bytes::from_static(body)),
        )
    }

    #[tokio::test]
    async fn test_send_to_terminated_stream_fails_fast() {
        let stream = Stream::detached("t1->t2/1".to_string(), 10, 4);
        stream.inner.terminate("session down");

        let fired = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let fired2 = Arc::clone(&fired);
        let frame = make_frame("obj1", b"abc").with_callback(Arc::new(move |_hdr, _ctx, res| {
            assert!(res.is_err());
            fired2.store(true, Ordering::SeqCst);
        }));
        let res = stream.send(frame).await;
        assert!(matches!(res, Err(TalusError::StreamTerminated(_))));
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_send_reactivates_inactive_stream() {
        let stream = Stream::detached("t1->t2/1".to_string(), 10, 4);
        stream
            .inner
            .sess
            .store(SessionState::Inactive as u8, Ordering::Release);
        stream.send(make_frame("obj1", b"abc")).await.unwrap();
        assert_eq!(stream.state(), SessionState::Active);
        assert_eq!(stream.inner.posted.load(Ordering::Acquire), 1);
        assert_eq!(stream.inner.queued.load(Ordering::Acquire), 1);
    }

    #[tokio::test]
    async fn test_quiescent_reflects_queue() {
        let stream = Stream::detached("t1->t2/1".to_string(), 10, 4);
        assert!(stream.is_quiescent());
        stream.send(make_frame("obj1", b"abc")).await.unwrap();
        assert!(!stream.is_quiescent());
    }
}

//! Stream collector: idle-timeout accounting and active/inactive transitions.
//!
//! One collector per process, created at startup and injected into every
//! stream factory. It owns the stream map and an intrusive min-heap keyed by
//! each stream's remaining idle ticks; `stream.time.index` always equals the
//! stream's heap position.
//!
//! The heap and map are mutated only by the collector task; control messages
//! (add/remove) arrive over a bounded channel.

use crate::transport::stream::{SessionState, Stream, StreamInner, WorkItem};
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

pub(crate) enum Ctrl {
    Add(Arc<StreamInner>),
    Remove(String),
}

/// The collector's synchronous core: map + heap + the per-tick sweep.
/// Separated from the async task so the tick logic is testable with direct
/// calls instead of timers.
#[derive(Default)]
pub struct CollectorCore {
    streams: HashMap<String, Arc<StreamInner>>,
    heap: Vec<Arc<StreamInner>>,
}

impl CollectorCore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub(crate) fn add(&mut self, s: Arc<StreamInner>) -> bool {
        if self.streams.contains_key(&s.lid) {
            return false;
        }
        self.streams.insert(s.lid.clone(), Arc::clone(&s));
        self.heap_push(s);
        true
    }

    pub(crate) fn remove(&mut self, lid: &str) -> Option<Arc<StreamInner>> {
        let s = self.streams.remove(lid)?;
        let idx = s.time.index.load(Ordering::Acquire);
        self.heap_remove_at(idx);
        s.time.ticks.store(1, Ordering::Release);
        Some(s)
    }

    /// One collector tick over every registered stream.
    pub fn tick_once(&mut self) {
        // countdown pass
        let snapshot: Vec<Arc<StreamInner>> = self.streams.values().cloned().collect();
        for s in &snapshot {
            match s.state() {
                SessionState::Terminated => {
                    let ticks = s.time.ticks.load(Ordering::Acquire) - 1;
                    self.update(s, ticks);
                    if ticks <= 0 {
                        self.reap(&s.lid);
                    }
                }
                SessionState::Active => {
                    let ticks = s.time.ticks.load(Ordering::Acquire) - 1;
                    self.update(s, ticks);
                }
                SessionState::Inactive => {}
            }
        }
        // idle pass
        let snapshot: Vec<Arc<StreamInner>> = self.streams.values().cloned().collect();
        for s in snapshot {
            if s.time.ticks.load(Ordering::Acquire) > 0 {
                continue;
            }
            self.update(&s, s.time.idle_ticks);
            if s.posted.swap(0, Ordering::AcqRel) > 0 {
                continue;
            }
            if s.queued.load(Ordering::Acquire) == 0
                && s.sess
                    .compare_exchange(
                        SessionState::Active as u8,
                        SessionState::Inactive as u8,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
            {
                // the writer flushes a tick-marker record and drops the wire
                let _ = s.work_tx.try_send(WorkItem::Tick);
                debug!(stream = %s.lid, "idle: active => inactive");
            }
        }
    }

    /// Remove a terminated stream and complete its left-over frames with the
    /// stored termination error.
    fn reap(&mut self, lid: &str) {
        let Some(s) = self.remove(lid) else { return };
        let reason = s.term_reason();
        let mut parked = s.work_rx.lock();
        if let Some(rx) = parked.as_mut() {
            while let Ok(item) = rx.try_recv() {
                if let WorkItem::Obj(frame) = item {
                    s.queued.fetch_sub(1, Ordering::AcqRel);
                    frame.complete(Err(crate::error::TalusError::StreamTerminated(
                        reason.clone(),
                    )));
                }
            }
        }
        // dropping the parked receiver closes the queue
        *parked = None;
        debug!(stream = lid, reason = %reason, "stream reaped");
    }

    /// Flag every stream terminated and wake its writer.
    pub(crate) fn signal_stop(&mut self) {
        for s in self.streams.values() {
            s.terminate("collector stopped");
            let _ = s
                .work_tx
                .try_send(WorkItem::Stop(Some("collector stopped".into())));
        }
    }

    /// Drain everything (collector teardown).
    pub(crate) fn teardown(&mut self) {
        self.signal_stop();
        let lids: Vec<String> = self.streams.keys().cloned().collect();
        for lid in lids {
            self.reap(&lid);
        }
        self.streams.clear();
        self.heap.clear();
    }

    // min-heap on time.ticks with back-pointers in time.index

    fn less(a: &StreamInner, b: &StreamInner) -> bool {
        a.time.ticks.load(Ordering::Acquire) < b.time.ticks.load(Ordering::Acquire)
    }

    fn heap_swap(&mut self, i: usize, j: usize) {
        self.heap.swap(i, j);
        self.heap[i].time.index.store(i, Ordering::Release);
        self.heap[j].time.index.store(j, Ordering::Release);
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if Self::less(&self.heap[i], &self.heap[parent]) {
                self.heap_swap(i, parent);
                i = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut i: usize) {
        let n = self.heap.len();
        loop {
            let (l, r) = (2 * i + 1, 2 * i + 2);
            let mut smallest = i;
            if l < n && Self::less(&self.heap[l], &self.heap[smallest]) {
                smallest = l;
            }
            if r < n && Self::less(&self.heap[r], &self.heap[smallest]) {
                smallest = r;
            }
            if smallest == i {
                break;
            }
            self.heap_swap(i, smallest);
            i = smallest;
        }
    }

    fn heap_push(&mut self, s: Arc<StreamInner>) {
        let i = self.heap.len();
        s.time.index.store(i, Ordering::Release);
        self.heap.push(s);
        self.sift_up(i);
    }

    fn heap_remove_at(&mut self, i: usize) {
        let last = self.heap.len().saturating_sub(1);
        if i > last {
            return;
        }
        if i != last {
            self.heap_swap(i, last);
        }
        self.heap.pop();
        if i < self.heap.len() {
            self.sift_up(i);
            let i = self.heap[i].time.index.load(Ordering::Acquire);
            self.sift_down(i);
        }
    }

    fn update(&mut self, s: &Arc<StreamInner>, ticks: i64) {
        s.time.ticks.store(ticks, Ordering::Release);
        let i = s.time.index.load(Ordering::Acquire);
        self.sift_up(i);
        let i = s.time.index.load(Ordering::Acquire);
        self.sift_down(i);
    }

    /// Verify the intrusive-heap invariants: back-pointers match positions,
    /// and every parent's ticks are <= its children's.
    pub fn heap_invariants_hold(&self) -> bool {
        for (i, s) in self.heap.iter().enumerate() {
            if s.time.index.load(Ordering::Acquire) != i {
                return false;
            }
            let t = s.time.ticks.load(Ordering::Acquire);
            for child in [2 * i + 1, 2 * i + 2] {
                if child < self.heap.len()
                    && self.heap[child].time.ticks.load(Ordering::Acquire) < t
                {
                    return false;
                }
            }
        }
        self.heap.len() == self.streams.len()
    }
}

/// Process-wide collector service handle. Owns the background task; streams
/// register and unregister through it.
pub struct StreamCollector {
    ctrl_tx: mpsc::Sender<Ctrl>,
    stop_tx: watch::Sender<bool>,
    handle: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl StreamCollector {
    pub fn new(tick_unit: Duration) -> Arc<Self> {
        let (ctrl_tx, ctrl_rx) = mpsc::channel(16);
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run(tick_unit, ctrl_rx, stop_rx));
        Arc::new(Self {
            ctrl_tx,
            stop_tx,
            handle: parking_lot::Mutex::new(Some(handle)),
        })
    }

    pub(crate) async fn register(&self, stream: &Stream) {
        let _ = self.ctrl_tx.send(Ctrl::Add(stream.inner())).await;
    }

    pub(crate) async fn unregister(&self, lid: &str) {
        let _ = self.ctrl_tx.send(Ctrl::Remove(lid.to_string())).await;
    }

    /// Stop the collector; every registered stream is stopped and drained
    /// before this returns.
    pub async fn stop(&self) {
        info!("stopping stream collector");
        let _ = self.stop_tx.send(true);
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

async fn run(tick_unit: Duration, mut ctrl_rx: mpsc::Receiver<Ctrl>, mut stop_rx: watch::Receiver<bool>) {
    let mut core = CollectorCore::new();
    let mut ticker = tokio::time::interval(tick_unit);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => core.tick_once(),
            ctrl = ctrl_rx.recv() => match ctrl {
                Some(Ctrl::Add(s)) => {
                    let lid = s.lid.clone();
                    if !core.add(s) {
                        debug!(stream = %lid, "already registered");
                    }
                }
                Some(Ctrl::Remove(lid)) => {
                    core.remove(&lid);
                }
                None => break,
            },
            _ = stop_rx.changed() => {
                if *stop_rx.borrow() {
                    core.signal_stop();
                    // let writers observe the stop and park their receivers
                    tokio::time::sleep(tick_unit).await;
                    core.teardown();
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::frame::ObjHdr;
    use crate::transport::stream::Stream;
    use crate::transport::{ObjFrame, Payload};
    use crate::types::{Bck, ObjAttrs};
    use std::sync::atomic::AtomicUsize;

    fn frame_with_cb(errors: Arc<AtomicUsize>) -> ObjFrame {
        ObjFrame::new(
            ObjHdr {
                bck: Bck::native("bck1"),
                objname: "obj".to_string(),
                opaque: Vec::new(),
                attrs: ObjAttrs {
                    size: 1,
                    atime: 0,
                    version: String::new(),
                    cksum_type: String::new(),
                    cksum_value: String::new(),
                },
            },
            Payload::Bytes(bytes::Bytes::from_static(b"x")),
        )
        .with_callback(Arc::new(move |_h, _c, res| {
            if res.is_err() {
                errors.fetch_add(1, Ordering::SeqCst);
            }
        }))
    }

    #[tokio::test]
    async fn test_heap_invariants_across_ticks() {
        let mut core = CollectorCore::new();
        for i in 0..8 {
            let s = Stream::detached(format!("t1->t{}/1", i + 2), (i + 3) as i64, 4);
            assert!(core.add(s.inner()));
            assert!(core.heap_invariants_hold());
        }
        for _ in 0..20 {
            core.tick_once();
            assert!(core.heap_invariants_hold());
        }
    }

    #[tokio::test]
    async fn test_add_remove_readd_same_id() {
        let mut core = CollectorCore::new();
        let s1 = Stream::detached("t1->t2/1".to_string(), 5, 4);
        assert!(core.add(s1.inner()));
        assert!(!core.add(s1.inner()));
        assert!(core.remove("t1->t2/1").is_some());
        assert!(core.remove("t1->t2/1").is_none());
        assert!(core.is_empty());

        // fresh registration behaves like the first one
        let s2 = Stream::detached("t1->t2/1".to_string(), 5, 4);
        assert!(core.add(s2.inner()));
        assert_eq!(core.len(), 1);
        assert!(core.heap_invariants_hold());
    }

    #[tokio::test]
    async fn test_idle_transition_at_exactly_idle_out() {
        let mut core = CollectorCore::new();
        let s = Stream::detached("t1->t2/1".to_string(), 3, 4);
        core.add(s.inner());

        // one frame posted, then quiet
        s.send(frame_with_cb(Arc::new(AtomicUsize::new(0))))
            .await
            .unwrap();
        // simulate the writer draining the queue
        let mut rx = s.inner.work_rx.lock().take().unwrap();
        let _ = rx.try_recv();
        s.inner.queued.store(0, Ordering::Release);
        *s.inner.work_rx.lock() = Some(rx);

        // first idle window expires: posted counter absorbs it, stays active
        for _ in 0..3 {
            core.tick_once();
        }
        assert_eq!(s.state(), SessionState::Active);

        // second idle window with no traffic: deactivates
        for _ in 0..3 {
            core.tick_once();
        }
        assert_eq!(s.state(), SessionState::Inactive);
        // the probe landed in the work queue
        let mut rx = s.inner.work_rx.lock().take().unwrap();
        assert!(matches!(rx.try_recv(), Ok(WorkItem::Tick)));
    }

    #[tokio::test]
    async fn test_nonempty_queue_stays_active() {
        let mut core = CollectorCore::new();
        let s = Stream::detached("t1->t2/1".to_string(), 2, 4);
        core.add(s.inner());
        s.send(frame_with_cb(Arc::new(AtomicUsize::new(0))))
            .await
            .unwrap();

        // queue still holds the frame: no deactivation, ever
        for _ in 0..10 {
            core.tick_once();
        }
        assert_eq!(s.state(), SessionState::Active);
    }

    #[tokio::test]
    async fn test_terminated_stream_drained_with_callbacks() {
        let mut core = CollectorCore::new();
        let s = Stream::detached("t1->t2/1".to_string(), 2, 8);
        core.add(s.inner());

        let errors = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            s.send(frame_with_cb(Arc::clone(&errors))).await.unwrap();
        }
        s.inner.terminate("session broken");

        // countdown: idle_ticks ticks until reap
        for _ in 0..3 {
            core.tick_once();
        }
        assert!(core.is_empty());
        assert_eq!(errors.load(Ordering::SeqCst), 3);
        assert!(core.heap_invariants_hold());
    }

    #[tokio::test]
    async fn test_teardown_clears_everything() {
        let mut core = CollectorCore::new();
        let errors = Arc::new(AtomicUsize::new(0));
        let streams: Vec<_> = (0..4)
            .map(|i| {
                let s = Stream::detached(format!("t1->t{}/1", i + 2), 5, 4);
                core.add(s.inner());
                s
            })
            .collect();
        for s in &streams {
            s.send(frame_with_cb(Arc::clone(&errors))).await.unwrap();
        }
        core.teardown();
        assert!(core.is_empty());
        assert_eq!(errors.load(Ordering::SeqCst), 4);
        for s in &streams {
            assert_eq!(s.state(), SessionState::Terminated);
        }
    }
}

//! Per-destination stream management for one trans-name.
//!
//! The orchestrator opens a bundle per traffic class ("reb" data frames,
//! "reb-ack" ack echoes, "ec" slices) at the start of a rebalance generation
//! and closes it at teardown. Streams are created lazily on first send and
//! registered with the injected collector.

use crate::cluster::Snode;
use crate::config::TransportConfig;
use crate::error::Result;
use crate::transport::collector::StreamCollector;
use crate::transport::stream::Stream;
use crate::transport::ObjFrame;
use crate::types::NodeId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Lazily-created outbound streams, one per destination target.
pub struct StreamBundle {
    local_id: NodeId,
    trans: String,
    collector: Arc<StreamCollector>,
    client: reqwest::Client,
    config: TransportConfig,
    streams: Mutex<HashMap<NodeId, Stream>>,
    next_session: AtomicU64,
}

impl StreamBundle {
    pub fn new(
        local_id: NodeId,
        trans: impl Into<String>,
        collector: Arc<StreamCollector>,
        client: reqwest::Client,
        config: TransportConfig,
    ) -> Self {
        Self {
            local_id,
            trans: trans.into(),
            collector,
            client,
            config,
            streams: Mutex::new(HashMap::new()),
            next_session: AtomicU64::new(1),
        }
    }

    async fn resolve(&self, dst: &Snode) -> Stream {
        if let Some(s) = self.streams.lock().get(&dst.id) {
            return s.clone();
        }
        let session = self.next_session.fetch_add(1, Ordering::Relaxed);
        let lid = format!("t{}->t{}/{}", self.local_id, dst.id, session);
        let mut put_url = format!(
            "{}/v1/transport?s={}&t={}",
            dst.intra_data_url, session, self.trans
        );
        if let Some(c) = &self.config.compression {
            put_url.push_str(&format!("&c={}", c));
        }
        let stream = Stream::spawn(
            lid,
            put_url,
            self.config.idle_ticks(),
            self.config.queue_depth,
            self.client.clone(),
        );
        let stream = {
            let mut streams = self.streams.lock();
            // a racing resolve may have won; keep the registered one
            streams.entry(dst.id).or_insert(stream).clone()
        };
        self.collector.register(&stream).await;
        stream
    }

    /// Send a frame to `dst`, creating the stream on first use. Blocks under
    /// queue backpressure.
    pub async fn send(&self, dst: &Snode, frame: ObjFrame) -> Result<()> {
        let stream = self.resolve(dst).await;
        stream.send(frame).await
    }

    /// True when every stream in the bundle has an empty queue and nothing
    /// in flight.
    pub fn is_quiescent(&self) -> bool {
        self.streams.lock().values().all(|s| s.is_quiescent())
    }

    /// Snapshot of (stream id, session state) pairs.
    pub fn stream_states(&self) -> Vec<(String, crate::transport::SessionState)> {
        self.streams
            .lock()
            .values()
            .map(|s| (s.id().to_string(), s.state()))
            .collect()
    }

    /// Graceful close of all streams; unregisters them from the collector.
    pub async fn close(&self) {
        let streams: Vec<Stream> = self.streams.lock().drain().map(|(_, s)| s).collect();
        for s in &streams {
            s.fin().await;
            self.collector.unregister(s.id()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bundle_starts_quiescent() {
        let collector = StreamCollector::new(std::time::Duration::from_millis(50));
        let bundle = StreamBundle::new(
            1,
            "reb",
            Arc::clone(&collector),
            reqwest::Client::new(),
            TransportConfig::default(),
        );
        assert!(bundle.is_quiescent());
        bundle.close().await;
        collector.stop().await;
    }
}

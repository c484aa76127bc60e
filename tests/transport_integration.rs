//! Streaming transport over real localhost sessions: delivery, completion
//! callbacks, and the idle deactivation/reactivation cycle.

mod common;

use bytes::Bytes;
use common::spawn_target;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use talus::config::TransportConfig;
use talus::transport::{
    ObjFrame, ObjHdr, Payload, SendCtx, SessionState, StreamBundle,
};
use talus::types::{Bck, ObjAttrs};

fn make_frame(name: &str, body: &[u8]) -> ObjFrame {
    ObjFrame::new(
        ObjHdr {
            bck: Bck::native("bck1"),
            objname: name.to_string(),
            opaque: vec![0xAB],
            attrs: ObjAttrs {
                size: body.len() as i64,
                atime: 0,
                version: "1".to_string(),
                cksum_type: String::new(),
                cksum_value: String::new(),
            },
        },
        Payload::Bytes(Bytes::copy_from_slice(body)),
    )
}

fn test_transport_config() -> TransportConfig {
    TransportConfig {
        idle_timeout: Duration::from_millis(500),
        tick_unit: Duration::from_millis(50),
        queue_depth: 64,
        ..Default::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stream_delivery_and_completion() {
    let receiver_target = spawn_target(2).await;
    let received = Arc::new(AtomicUsize::new(0));
    {
        let received = Arc::clone(&received);
        receiver_target.manager.receiver().register(
            "itest",
            Arc::new(move |hdr: ObjHdr, payload: Bytes| {
                assert_eq!(payload.len() as i64, hdr.attrs.size);
                received.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );
    }

    let collector = talus::transport::StreamCollector::new(Duration::from_millis(50));
    let bundle = StreamBundle::new(
        1,
        "itest",
        Arc::clone(&collector),
        reqwest::Client::new(),
        test_transport_config(),
    );

    let completed = Arc::new(AtomicUsize::new(0));
    for i in 0..10 {
        let completed = Arc::clone(&completed);
        let frame = make_frame(&format!("obj-{}", i), b"payload-bytes")
            .with_ctx(SendCtx::Raw)
            .with_callback(Arc::new(move |_hdr, _ctx, res| {
                assert!(res.is_ok());
                completed.fetch_add(1, Ordering::SeqCst);
            }));
        bundle
            .send(&receiver_target.snode, frame)
            .await
            .expect("send");
    }

    // every frame completes exactly once on the sender
    tokio::time::timeout(Duration::from_secs(5), async {
        while completed.load(Ordering::SeqCst) < 10 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("completion callbacks");

    // and arrives exactly once on the receiver (tick markers filtered)
    tokio::time::timeout(Duration::from_secs(5), async {
        while received.load(Ordering::SeqCst) < 10 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("delivery");
    assert_eq!(received.load(Ordering::SeqCst), 10);

    bundle.close().await;
    collector.stop().await;
    receiver_target.collector.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_idle_deactivation_and_reactivation() {
    let receiver_target = spawn_target(2).await;
    let received = Arc::new(AtomicUsize::new(0));
    {
        let received = Arc::clone(&received);
        receiver_target.manager.receiver().register(
            "itest",
            Arc::new(move |_hdr: ObjHdr, _payload: Bytes| {
                received.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );
    }

    let collector = talus::transport::StreamCollector::new(Duration::from_millis(50));
    let config = test_transport_config();
    let idle_out = config.idle_timeout;
    let bundle = StreamBundle::new(
        1,
        "itest",
        Arc::clone(&collector),
        reqwest::Client::new(),
        config,
    );

    // one small frame, then silence
    bundle
        .send(&receiver_target.snode, make_frame("obj-1", b"x"))
        .await
        .expect("send");

    // two idle windows plus slack: the stream must have gone inactive
    tokio::time::sleep(idle_out * 2 + Duration::from_millis(300)).await;
    let states = bundle.stream_states();
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].1, SessionState::Inactive, "stream should idle out");

    // the next send transitions back to active and delivers
    bundle
        .send(&receiver_target.snode, make_frame("obj-2", b"y"))
        .await
        .expect("send after idle");
    tokio::time::timeout(Duration::from_secs(5), async {
        while received.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("delivery after reactivation");

    let states = bundle.stream_states();
    assert_eq!(states[0].1, SessionState::Active);

    bundle.close().await;
    collector.stop().await;
    receiver_target.collector.stop().await;
}

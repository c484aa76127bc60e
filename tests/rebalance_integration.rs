//! End-to-end rebalance runs over real localhost clusters.

mod common;

use common::{has_object, make_smap, random_payload, seed_object, spawn_target};
use std::time::Duration;
use talus::cluster::hrw_target;
use talus::reb::Stage;
use talus::types::Bck;

const NUM_OBJECTS: usize = 60;

/// Add-member rebalance: seed objects over {t1, t2} at map v5, add t3 at
/// v6, run the generation on all three. Every object must end up on its
/// v6 HRW owner and nowhere else.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_add_member_rebalance() {
    let t1 = spawn_target(1).await;
    let t2 = spawn_target(2).await;
    let t3 = spawn_target(3).await;

    let smap_v5 = make_smap(5, &[&t1, &t2]);
    let smap_v6 = make_smap(6, &[&t1, &t2, &t3]);
    let bck = Bck::native("bck1");

    // seed per v5 placement
    let mut migrating = 0;
    for i in 0..NUM_OBJECTS {
        let name = format!("dir/obj-{:04}", i);
        let uname = bck.uname(&name);
        let owner_v5 = hrw_target(&uname, &smap_v5).unwrap().id;
        let owner_v6 = hrw_target(&uname, &smap_v6).unwrap().id;
        if owner_v5 != owner_v6 {
            migrating += 1;
        }
        let target = if owner_v5 == 1 { &t1 } else { &t2 };
        seed_object(target, &bck, &name, &random_payload(64 + i * 7));
    }
    assert!(migrating > 0, "test needs at least one migration");

    for t in [&t1, &t2, &t3] {
        t.manager.update_smap(smap_v6.clone());
    }

    // raise generation 6 on all targets concurrently
    let runs = tokio::join!(
        t1.manager.run_rebalance(smap_v6.clone(), 6, &[]),
        t2.manager.run_rebalance(smap_v6.clone(), 6, &[]),
        t3.manager.run_rebalance(smap_v6.clone(), 6, &[]),
    );
    runs.0.expect("t1 run");
    runs.1.expect("t2 run");
    runs.2.expect("t3 run");

    // let trailing acks and deletions settle
    tokio::time::sleep(Duration::from_millis(500)).await;

    for t in [&t1, &t2, &t3] {
        let status = t.manager.get_status();
        assert_eq!(status.stage, Stage::Done, "t{} stage", t.snode.id);
        assert!(!status.aborted, "t{} aborted", t.snode.id);
    }

    // every object sits on exactly its v6 HRW owner
    for i in 0..NUM_OBJECTS {
        let name = format!("dir/obj-{:04}", i);
        let uname = bck.uname(&name);
        let owner = hrw_target(&uname, &smap_v6).unwrap().id;
        for t in [&t1, &t2, &t3] {
            let here = has_object(t, &bck, &name);
            assert_eq!(
                here,
                t.snode.id == owner,
                "{} on t{} (owner t{})",
                name,
                t.snode.id,
                owner
            );
        }
    }

    // cluster-wide tx equals rx equals the number of migrated objects
    let tx: i64 = [&t1, &t2, &t3]
        .iter()
        .map(|t| t.manager.get_status().stats_delta.tx_reb_count)
        .sum();
    let rx: i64 = [&t1, &t2, &t3]
        .iter()
        .map(|t| t.manager.get_status().stats_delta.rx_reb_count)
        .sum();
    assert_eq!(tx, migrating as i64);
    assert_eq!(rx, migrating as i64);

    for t in [t1, t2, t3] {
        t.collector.stop().await;
    }
}

/// Abort-by-newer-epoch: a peer reporting a newer cluster map makes the
/// local run abort without removing the in-progress marker.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_abort_on_newer_epoch() {
    let t1 = spawn_target(1).await;
    let t2 = spawn_target(2).await;

    let smap_v6 = make_smap(6, &[&t1, &t2]);
    // t2 already observed v7
    let smap_v7 = make_smap(7, &[&t1, &t2]);
    t2.manager.update_smap(smap_v7);

    let res = t1.manager.run_rebalance(smap_v6, 6, &[]).await;
    assert!(res.is_err(), "newer epoch must abort the run");

    let status = t1.manager.get_status();
    assert!(status.aborted);

    // the in-progress marker survives an abort
    let mpaths = talus::fs::MountpathSet::new(&[t1.mountpath.clone()]);
    assert!(talus::fs::marker_exists(&mpaths, "rebalance"));

    t1.collector.stop().await;
    t2.collector.stop().await;
}

//! Common test utilities for integration tests.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use talus::cluster::{Smap, Snode};
use talus::config::TalusConfig;
use talus::daemon;
use talus::fs::{ContentType, Mountpath};
use talus::memsys::MemManager;
use talus::reb::RebManager;
use talus::transport::{ReceiverRegistry, StreamCollector};
use talus::types::Bck;
use tempfile::TempDir;

/// One in-process target: manager + listening daemon + scratch mountpath.
pub struct TestTarget {
    pub manager: Arc<RebManager>,
    pub snode: Snode,
    pub collector: Arc<StreamCollector>,
    pub mountpath: PathBuf,
    _tmp: TempDir,
    _server: tokio::task::JoinHandle<()>,
}

/// Timeouts shrunk for tests; semantics unchanged.
pub fn test_config(id: u64, port: u16, mountpath: PathBuf) -> TalusConfig {
    let mut config = TalusConfig::development(mountpath);
    config.node.id = id;
    config.node.name = format!("t{}", id);
    config.node.port = port;
    let url = format!("http://127.0.0.1:{}", port);
    config.node.public_url = url.clone();
    config.node.intra_control_url = url.clone();
    config.node.intra_data_url = url;

    config.timeout.cplane_operation = Duration::from_millis(100);
    config.timeout.max_keepalive = Duration::from_millis(500);
    config.timeout.status_poll = Duration::from_secs(2);
    config.rebalance.dest_retry_time = Duration::from_secs(3);
    config.rebalance.quiesce = Duration::from_millis(300);
    config.transport.idle_timeout = Duration::from_millis(500);
    config.transport.tick_unit = Duration::from_millis(50);
    config
}

/// Bind a listener, build the whole target stack on its port, start serving.
pub async fn spawn_target(id: u64) -> TestTarget {
    let tmp = TempDir::new().expect("tempdir");
    let mountpath = tmp.path().join("mp1");
    std::fs::create_dir_all(&mountpath).expect("mountpath");

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let port = listener.local_addr().expect("addr").port();

    let config = Arc::new(test_config(id, port, mountpath.clone()));
    let collector = StreamCollector::new(config.transport.tick_unit);
    let receiver = Arc::new(ReceiverRegistry::new(config.transport.max_header));
    let mem = MemManager::new(config.memsys.budget_bytes);
    let manager = RebManager::new(
        Arc::clone(&config),
        Arc::clone(&collector),
        Arc::clone(&receiver),
        mem,
    );

    let app = daemon::router(Arc::clone(&manager), receiver);
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    let snode = Snode::new_target(id, format!("t{}", id), format!("http://127.0.0.1:{}", port));
    TestTarget {
        manager,
        snode,
        collector,
        mountpath,
        _tmp: tmp,
        _server: server,
    }
}

/// Cluster map over the given targets.
pub fn make_smap(version: i64, targets: &[&TestTarget]) -> Arc<Smap> {
    let mut smap = Smap::new(version);
    for t in targets {
        smap.add_target(t.snode.clone());
    }
    Arc::new(smap)
}

/// Random object content of the given size.
pub fn random_payload(size: usize) -> Vec<u8> {
    use rand::Rng;
    let mut data = vec![0u8; size];
    rand::thread_rng().fill(&mut data[..]);
    data
}

/// Seed an object file directly on a target's mountpath.
pub fn seed_object(target: &TestTarget, bck: &Bck, name: &str, data: &[u8]) {
    let mpath = Mountpath::new(&target.mountpath);
    let fqn = mpath.fqn(bck, ContentType::Object, name);
    std::fs::create_dir_all(fqn.parent().unwrap()).expect("obj dir");
    std::fs::write(fqn, data).expect("seed object");
}

/// Does the target hold the object locally?
pub fn has_object(target: &TestTarget, bck: &Bck, name: &str) -> bool {
    let mpath = Mountpath::new(&target.mountpath);
    mpath.fqn(bck, ContentType::Object, name).exists()
}

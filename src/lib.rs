//! Talus - the core of a distributed object-storage cluster.
//!
//! Talus implements the two subsystems that make cluster membership changes
//! safe: the global rebalance coordinator and the intra-cluster streaming
//! transport it rides on.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Talus target                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Rebalance: 10-stage orchestrator | joggers | EC pipeline   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Transport: streams | collector | frame codec | receivers   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Cluster: Smap snapshots | HRW selection                    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Storage: mountpaths | LOM | EC slices + sidecar metadata   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! A new cluster map version raises a rebalance generation; every target
//! walks its mountpaths, streams misplaced objects to their HRW owners,
//! waits for cluster-wide acks and quiescence, and tears down. Erasure-coded
//! content follows its own staged sub-pipeline in parallel.
//!
//! # Quick Start
//!
//! ```no_run
//! use talus::config::TalusConfig;
//!
//! #[tokio::main]
//! async fn main() -> talus::Result<()> {
//!     let config = TalusConfig::development("/tmp/talus/mp1".into());
//!     talus::run(config).await
//! }
//! ```

pub mod cluster;
pub mod config;
pub mod daemon;
pub mod ec;
pub mod error;
pub mod fs;
pub mod gfn;
pub mod lom;
pub mod memsys;
pub mod observability;
pub mod reb;
pub mod stats;
pub mod transport;
pub mod types;

// Re-exports
pub use error::{Result, TalusError};

use crate::config::TalusConfig;
use crate::fs::MountpathSet;
use crate::memsys::MemManager;
use crate::reb::RebManager;
use crate::transport::{ReceiverRegistry, StreamCollector};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Run a Talus target with the given configuration.
pub async fn run(config: TalusConfig) -> Result<()> {
    config.validate()?;
    observability::init(&config.observability)?;
    info!(node = %config.node.name, id = config.node.id, "starting talus target");

    for mpath in &config.storage.mountpaths {
        std::fs::create_dir_all(mpath)?;
    }
    let mpaths = MountpathSet::new(&config.storage.mountpaths);
    if fs::marker_exists(&mpaths, "rebalance") {
        warn!("found in-progress rebalance marker from a previous run");
    }

    let config = Arc::new(config);
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
    let addr = SocketAddr::from(([0, 0, 0, 0], config.node.port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "intra-cluster endpoints listening");

    tokio::select! {
        res = axum::serve(listener, app) => {
            if let Err(e) = res {
                warn!("server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    manager.abort_local("shutting down");
    collector.stop().await;
    info!("talus target stopped");
    Ok(())
}

//! Configuration module for Talus.
//!
//! A flat configuration object with per-subsystem sections. All durations
//! that drive wait predicates are plain fields here so tests can shrink them
//! without touching global state.

use crate::error::{Result, TalusError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for a Talus target node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TalusConfig {
    /// Node identity and addresses.
    pub node: NodeConfig,
    /// Rebalance pacing and limits.
    pub rebalance: RebalanceConfig,
    /// Control-plane timeouts.
    pub timeout: TimeoutConfig,
    /// Erasure coding settings.
    pub ec: EcConfig,
    /// Streaming transport settings.
    pub transport: TransportConfig,
    /// Local storage (mountpaths).
    pub storage: StorageConfig,
    /// Memory manager budget.
    pub memsys: MemConfig,
    /// Logging configuration.
    pub observability: ObservabilityConfig,
}

impl TalusConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| TalusError::Config(format!("failed to read config file: {}", e)))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| TalusError::Config(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.node.id == 0 {
            return Err(TalusError::InvalidConfig {
                field: "node.id".to_string(),
                reason: "node ID must be non-zero".to_string(),
            });
        }
        if self.rebalance.multiplier == 0 {
            return Err(TalusError::InvalidConfig {
                field: "rebalance.multiplier".to_string(),
                reason: "multiplier must be at least 1".to_string(),
            });
        }
        if self.ec.enabled && (self.ec.data_slices == 0 || self.ec.data_slices > 32) {
            return Err(TalusError::InvalidConfig {
                field: "ec.data_slices".to_string(),
                reason: "data slices must be in [1, 32]".to_string(),
            });
        }
        if self.ec.enabled && (self.ec.parity_slices == 0 || self.ec.parity_slices > 32) {
            return Err(TalusError::InvalidConfig {
                field: "ec.parity_slices".to_string(),
                reason: "parity slices must be in [1, 32]".to_string(),
            });
        }
        if self.transport.tick_unit > self.transport.idle_timeout {
            return Err(TalusError::InvalidConfig {
                field: "transport.tick_unit".to_string(),
                reason: "tick unit must not exceed the idle timeout".to_string(),
            });
        }
        if self.storage.mountpaths.is_empty() {
            return Err(TalusError::InvalidConfig {
                field: "storage.mountpaths".to_string(),
                reason: "at least one mountpath is required".to_string(),
            });
        }
        Ok(())
    }

    /// Minimal single-node configuration for development and tests.
    pub fn development(mountpath: PathBuf) -> Self {
        Self {
            node: NodeConfig {
                id: 1,
                name: "dev-target".to_string(),
                ..Default::default()
            },
            storage: StorageConfig {
                mountpaths: vec![mountpath],
            },
            ..Default::default()
        }
    }
}

/// Node identity and network addresses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Unique node identifier, non-zero.
    pub id: u64,
    /// Human-readable node name.
    pub name: String,
    /// Listen port for the intra-cluster endpoints.
    pub port: u16,
    /// Public (user-facing) URL.
    pub public_url: String,
    /// Intra-cluster control network URL.
    pub intra_control_url: String,
    /// Intra-cluster data network URL.
    pub intra_data_url: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            id: 1,
            name: "target".to_string(),
            port: 9080,
            public_url: "http://127.0.0.1:8080".to_string(),
            intra_control_url: "http://127.0.0.1:9080".to_string(),
            intra_data_url: "http://127.0.0.1:9080".to_string(),
        }
    }
}

/// Rebalance pacing and limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalanceConfig {
    /// Per-mountpath send concurrency.
    pub multiplier: usize,
    /// Wait-ack ceiling before a retransmit sweep.
    #[serde(with = "duration_ms")]
    pub dest_retry_time: Duration,
    /// Required quiet window before teardown.
    #[serde(with = "duration_ms")]
    pub quiesce: Duration,
    /// Extra wait-ack grace granted per ten targets.
    #[serde(with = "duration_ms")]
    pub ack_grace_per10: Duration,
    /// Hard clamp: the extended deadline never exceeds
    /// `ack_grace_clamp * dest_retry_time`.
    pub ack_grace_clamp: u32,
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self {
            multiplier: 2,
            dest_retry_time: Duration::from_secs(120),
            quiesce: Duration::from_secs(20),
            ack_grace_per10: Duration::from_secs(60),
            ack_grace_clamp: 2,
        }
    }
}

/// Control-plane timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Generic wait tick for all wait predicates.
    #[serde(with = "duration_ms")]
    pub cplane_operation: Duration,
    /// Ping ceiling.
    #[serde(with = "duration_ms")]
    pub max_keepalive: Duration,
    /// Per status-poll HTTP request timeout.
    #[serde(with = "duration_ms")]
    pub status_poll: Duration,
}

impl TimeoutConfig {
    /// Interval between expensive recomputations (e.g. the cached tmap in
    /// status responses).
    pub fn keepalive_retry(&self) -> Duration {
        self.max_keepalive * 2
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            cplane_operation: Duration::from_secs(2),
            max_keepalive: Duration::from_secs(4),
            status_poll: Duration::from_secs(10),
        }
    }
}

/// Erasure coding settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EcConfig {
    pub enabled: bool,
    /// Number of data slices (k), in [1, 32].
    pub data_slices: usize,
    /// Number of parity slices (m), in [1, 32].
    pub parity_slices: usize,
    /// Objects at or below this size are replicated instead of encoded.
    pub obj_size_limit: i64,
    /// EC rebalance batch size (objects reconstructed per batch).
    pub batch_size: usize,
}

impl Default for EcConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            data_slices: 4,
            parity_slices: 2,
            obj_size_limit: 256 * 1024,
            batch_size: 8,
        }
    }
}

/// Streaming transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// A stream with no traffic for this long is deactivated.
    #[serde(with = "duration_ms")]
    pub idle_timeout: Duration,
    /// Collector tick granularity; idle timeouts are measured in these units.
    #[serde(with = "duration_ms")]
    pub tick_unit: Duration,
    /// Per-stream work queue depth (frames); senders block when full.
    pub queue_depth: usize,
    /// Maximum encoded frame header size.
    pub max_header: usize,
    /// Wire compression label advertised on new sessions; None disables.
    #[serde(default)]
    pub compression: Option<String>,
}

impl TransportConfig {
    pub fn idle_ticks(&self) -> i64 {
        let ticks = self.idle_timeout.as_millis() / self.tick_unit.as_millis().max(1);
        (ticks as i64).max(1)
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(4),
            tick_unit: Duration::from_millis(100),
            queue_depth: 256,
            max_header: 4 * 1024,
            compression: None,
        }
    }
}

/// Local storage configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Mountpaths (one filesystem each, by convention).
    pub mountpaths: Vec<PathBuf>,
}

/// Memory manager budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemConfig {
    /// Soft budget for pooled slice buffers, bytes.
    pub budget_bytes: usize,
}

impl Default for MemConfig {
    fn default() -> Self {
        Self {
            budget_bytes: 1024 * 1024 * 1024,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Serialize durations as integer milliseconds.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

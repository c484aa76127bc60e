//! Error types for the Talus cluster core.
//!
//! One unified error enum for the rebalance and transport subsystems, with
//! classification helpers used by the orchestrator's retry policy and by the
//! mountpath health path.
//!
//! # Error Categories
//!
//! - **Cluster**: membership and HRW selection errors
//! - **Transport**: stream lifecycle and wire errors
//! - **Rebalance**: run serialization, epoch and abort conditions
//! - **EC**: slice reconstruction errors
//! - **Storage/IO**: local read/write errors, mountpath-critical conditions

use std::io;
use thiserror::Error;

/// Main error type for Talus operations.
#[derive(Error, Debug)]
pub enum TalusError {
    // Cluster errors
    #[error("no eligible target for {0}")]
    NoEligibleTarget(String),

    #[error("node not found: {0}")]
    NodeNotFound(u64),

    #[error("node {0} has uninitialized HRW digest")]
    UninitializedNode(u64),

    // Epoch and run serialization
    #[error("newer epoch observed: local v{have}, seen v{seen}")]
    NewerEpoch { have: i64, seen: i64 },

    #[error("rebalance g{running} already active, refusing g{requested}")]
    AlreadyRunning { running: i64, requested: i64 },

    #[error("aborted: {0}")]
    Aborted(String),

    // Transport errors
    #[error("stream terminated: {0}")]
    StreamTerminated(String),

    #[error("stream queue closed")]
    StreamClosed,

    #[error("peer {node} unreachable: {reason}")]
    PeerUnreachable { node: u64, reason: String },

    #[error("frame header exceeds limit: {got} > {limit}")]
    HeaderTooLarge { got: usize, limit: usize },

    #[error("size mismatch: header says {expected}, object has {got}")]
    SizeMismatch { expected: i64, got: i64 },

    // EC errors
    #[error("insufficient slices: have {have}, need {need}")]
    InsufficientSlices { have: usize, need: usize },

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("invalid slice metadata: {0}")]
    InvalidSliceMeta(String),

    // Object errors
    #[error("object not found: {0}")]
    ObjectNotFound(String),

    #[error("invalid object path: {0}")]
    InvalidFqn(String),

    // Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    // Wire and serialization
    #[error("http error: {0}")]
    Http(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("unexpected status from peer: {0}")]
    UnexpectedStatus(u16),

    // External errors
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl TalusError {
    /// Transient conditions worth a single same-timeout retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TalusError::PeerUnreachable { .. }
                | TalusError::Http(_)
                | TalusError::UnexpectedStatus(_)
        )
    }

    /// True when the condition must abort the whole rebalance run.
    pub fn is_fatal_for_run(&self) -> bool {
        matches!(self, TalusError::NewerEpoch { .. } | TalusError::Aborted(_))
    }

    /// I/O conditions that indicate a sick mountpath rather than a bad
    /// object. These bubble up to the filesystem-health collaborator which
    /// may disable the mountpath.
    pub fn is_mpath_critical(&self) -> bool {
        let errno = match self {
            TalusError::Io(e) => match e.raw_os_error() {
                Some(code) => code,
                None => return false,
            },
            _ => return false,
        };
        matches!(
            errno,
            libc::EIO
                | libc::ENOSPC
                | libc::EROFS
                | libc::ESTALE
                | libc::ENXIO
                | libc::EBADF
                | libc::ENODEV
                | libc::EDQUOT
                | libc::EUCLEAN
                | libc::ENOTDIR
                | libc::EBUSY
        )
    }
}

impl From<bincode::Error> for TalusError {
    fn from(e: bincode::Error) -> Self {
        TalusError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for TalusError {
    fn from(e: serde_json::Error) -> Self {
        TalusError::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for TalusError {
    fn from(e: reqwest::Error) -> Self {
        TalusError::Http(e.to_string())
    }
}

/// Result type alias for Talus operations.
pub type Result<T> = std::result::Result<T, TalusError>;

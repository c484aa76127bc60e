//! Core type definitions for the Talus cluster core.
//!
//! This module contains the fundamental data types shared by the rebalance
//! orchestrator and the streaming transport: bucket identity, object
//! attributes, and the canonical object UID ("uname") that HRW selection and
//! ack bookkeeping key on.
//!
//! # Key Types
//!
//! - [`Bck`]: bucket identity (name + provider + namespace)
//! - [`ObjAttrs`]: object attributes carried in every stream frame header
//! - [`Checksum`]: xxh3-64 content checksum
//!
//! # Examples
//!
//! ```rust
//! use talus::types::{Bck, Provider};
//!
//! let bck = Bck::native("imagenet");
//! assert_eq!(bck.uname("train/0001.tar"), "native/@/imagenet/train/0001.tar");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a node (proxy or target) in the cluster.
pub type NodeId = u64;

/// Monotonic identifier of a rebalance generation.
pub type RebId = i64;

/// Sentinel frame size signaling an idle-transition probe on a stream.
/// Never a valid object size; filtered out before the receive handler.
pub const TICK_MARKER: i64 = -1;

/// Bucket provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Native,
    Cloud,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Native => "native",
            Provider::Cloud => "cloud",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "native" => Some(Provider::Native),
            "cloud" => Some(Provider::Cloud),
            _ => None,
        }
    }
}

/// Bucket namespace. The global namespace renders as "@".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Namespace(pub String);

impl Namespace {
    pub fn global() -> Self {
        Namespace("@".to_string())
    }

    pub fn is_global(&self) -> bool {
        self.0 == "@"
    }
}

impl Default for Namespace {
    fn default() -> Self {
        Self::global()
    }
}

/// Bucket identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bck {
    pub name: String,
    pub provider: Provider,
    #[serde(default)]
    pub ns: Namespace,
}

impl Bck {
    pub fn new(name: impl Into<String>, provider: Provider, ns: Namespace) -> Self {
        Self {
            name: name.into(),
            provider,
            ns,
        }
    }

    pub fn native(name: impl Into<String>) -> Self {
        Self::new(name, Provider::Native, Namespace::global())
    }

    /// Canonical object UID. Stable across the cluster; HRW, acks, and the
    /// EC waiter registry all key on this string.
    pub fn uname(&self, objname: &str) -> String {
        format!("{}/{}/{}/{}", self.provider.as_str(), self.ns.0, self.name, objname)
    }
}

impl fmt::Display for Bck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.provider.as_str(), self.ns.0, self.name)
    }
}

/// Object attributes carried in every stream frame header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjAttrs {
    /// Object size in bytes; [`TICK_MARKER`] marks an idle probe frame.
    pub size: i64,
    /// Access time, unix nanoseconds.
    pub atime: i64,
    /// Object version (opaque, provider-defined).
    pub version: String,
    /// Checksum type, e.g. "xxh3".
    pub cksum_type: String,
    /// Checksum value, hex.
    pub cksum_value: String,
}

impl ObjAttrs {
    pub fn tick_marker() -> Self {
        Self {
            size: TICK_MARKER,
            atime: 0,
            version: String::new(),
            cksum_type: String::new(),
            cksum_value: String::new(),
        }
    }

    pub fn is_tick_marker(&self) -> bool {
        self.size == TICK_MARKER
    }
}

/// Content checksum (xxh3-64 over the object bytes).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksum {
    pub ty: String,
    pub value: String,
}

impl Checksum {
    pub const XXH3: &'static str = "xxh3";

    pub fn xxh3(data: &[u8]) -> Self {
        Self {
            ty: Self::XXH3.to_string(),
            value: format!("{:016x}", xxhash_rust::xxh3::xxh3_64(data)),
        }
    }

    pub fn empty() -> Self {
        Self {
            ty: String::new(),
            value: String::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uname_is_canonical() {
        let a = Bck::native("bck1");
        let b = Bck::new("bck1", Provider::Cloud, Namespace::global());
        assert_ne!(a.uname("obj"), b.uname("obj"));
        assert_eq!(a.uname("obj"), Bck::native("bck1").uname("obj"));
    }

    #[test]
    fn test_tick_marker_attrs() {
        let attrs = ObjAttrs::tick_marker();
        assert!(attrs.is_tick_marker());
        assert!(attrs.size < 0);
    }

    #[test]
    fn test_checksum_stable() {
        let c1 = Checksum::xxh3(b"payload");
        let c2 = Checksum::xxh3(b"payload");
        assert_eq!(c1, c2);
        assert_eq!(c1.ty, "xxh3");
        assert_ne!(Checksum::xxh3(b"other").value, c1.value);
    }
}

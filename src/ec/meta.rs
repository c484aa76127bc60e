//! Sidecar metadata for EC slices and replicas.
//!
//! Stored beside each slice/replica under the `mt/` content type, in a
//! compact `key value` line format that stays stable within a cluster
//! version:
//!
//! ```text
//! size 1048576
//! data 4
//! parity 2
//! copy 0
//! chk 9a3f...
//! sliceid 3
//! ```
//!
//! `sliceid 0` marks a full object or replica.

use crate::error::{Result, TalusError};
use std::path::Path;

/// Durable slice/replica descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcMeta {
    /// Original object size (required for correct restoration).
    pub obj_size: i64,
    /// Number of data slices (unused when the object was replicated).
    pub data_slices: usize,
    /// Number of parity slices.
    pub parity_slices: usize,
    /// Replicated rather than erasure-coded.
    pub is_copy: bool,
    /// Original-object checksum; used to pick matching slices on restore.
    pub obj_cksum: String,
    /// Ordinal of this slice, 1-based; 0 means full object or replica.
    pub slice_id: u16,
}

impl EcMeta {
    pub fn encode(&self) -> String {
        format!(
            "size {}\ndata {}\nparity {}\ncopy {}\nchk {}\nsliceid {}\n",
            self.obj_size,
            self.data_slices,
            self.parity_slices,
            u8::from(self.is_copy),
            self.obj_cksum,
            self.slice_id,
        )
    }

    pub fn decode(text: &str) -> Result<Self> {
        let mut meta = EcMeta {
            obj_size: -1,
            data_slices: 0,
            parity_slices: 0,
            is_copy: false,
            obj_cksum: String::new(),
            slice_id: 0,
        };
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (key, value) = line
                .split_once(' ')
                .ok_or_else(|| TalusError::InvalidSliceMeta(line.to_string()))?;
            macro_rules! field {
                ($ty:ty) => {
                    value
                        .parse::<$ty>()
                        .map_err(|_| TalusError::InvalidSliceMeta(line.to_string()))?
                };
            }
            match key {
                "size" => meta.obj_size = field!(i64),
                "data" => meta.data_slices = field!(usize),
                "parity" => meta.parity_slices = field!(usize),
                "copy" => meta.is_copy = field!(u8) != 0,
                "chk" => meta.obj_cksum = value.to_string(),
                "sliceid" => meta.slice_id = field!(u16),
                // unknown keys are ignored for forward compatibility
                _ => {}
            }
        }
        if meta.obj_size < 0 {
            return Err(TalusError::InvalidSliceMeta("missing size".to_string()));
        }
        Ok(meta)
    }

    pub fn store(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.encode())?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::decode(&text)
    }
}

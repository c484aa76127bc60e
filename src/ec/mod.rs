//! Erasure coding: Reed-Solomon slice codec, sidecar metadata, and the
//! slice-arrival wait registry used by EC rebalance.
//!
//! Objects above the configured size limit are split into `data_slices`
//! data + `parity_slices` parity slices, distributed across the first
//! `data + parity + 1` targets in HRW order (index 0 is the main target and
//! keeps the full object). Small objects are replicated instead. Every slice
//! and replica carries a sidecar metadata file on the same mountpath.

mod codec;
mod meta;
mod waiter;

pub use codec::{slice_size, SliceCodec};
pub use meta::EcMeta;
pub use waiter::{SliceWaiter, WaitMode, WaitRegistry};

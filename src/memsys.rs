//! Budgeted memory manager for slice payloads.
//!
//! Reconstruction buffers are drawn from a managed budget; under pressure,
//! large working sets spill to temp files instead of RAM.

use crate::error::Result;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Working sets at or above this size spill to disk when pressure is High
/// or worse.
pub const OBJ_SIZE_HIGH_MEM: i64 = 50 * 1024 * 1024;

/// Memory pressure levels, by used/budget ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MemPressure {
    Normal,
    High,
    Extreme,
    Oom,
}

/// Shared memory manager handle.
#[derive(Clone)]
pub struct MemManager {
    inner: Arc<MemInner>,
}

struct MemInner {
    budget: usize,
    used: AtomicUsize,
}

impl MemManager {
    pub fn new(budget: usize) -> Self {
        Self {
            inner: Arc::new(MemInner {
                budget: budget.max(1),
                used: AtomicUsize::new(0),
            }),
        }
    }

    pub fn pressure(&self) -> MemPressure {
        let used = self.inner.used.load(Ordering::Relaxed);
        let pct = used * 100 / self.inner.budget;
        match pct {
            0..=49 => MemPressure::Normal,
            50..=74 => MemPressure::High,
            75..=99 => MemPressure::Extreme,
            _ => MemPressure::Oom,
        }
    }

    pub fn used(&self) -> usize {
        self.inner.used.load(Ordering::Relaxed)
    }

    /// Allocate an accounted in-RAM buffer.
    pub fn alloc(&self, size: usize) -> MemBuf {
        self.inner.used.fetch_add(size, Ordering::Relaxed);
        MemBuf {
            mgr: self.clone(),
            data: vec![0u8; size],
        }
    }

    /// Choose a working buffer for `size` bytes: RAM normally, a temp file
    /// when pressure is at least High and the working size is large.
    pub fn slice_writer(&self, size: i64) -> Result<SliceWriter> {
        if self.pressure() >= MemPressure::High && size >= OBJ_SIZE_HIGH_MEM {
            let file = tempfile::tempfile()?;
            Ok(SliceWriter::File(file))
        } else {
            self.inner.used.fetch_add(size.max(0) as usize, Ordering::Relaxed);
            Ok(SliceWriter::Mem(self.clone(), Vec::with_capacity(size.max(0) as usize)))
        }
    }

    fn release(&self, size: usize) {
        self.inner.used.fetch_sub(size.min(self.used()), Ordering::Relaxed);
    }
}

/// Accounted in-RAM buffer; returns its bytes to the budget on drop.
pub struct MemBuf {
    mgr: MemManager,
    data: Vec<u8>,
}

impl MemBuf {
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Drop for MemBuf {
    fn drop(&mut self) {
        self.mgr.release(self.data.len());
    }
}

/// Destination for a slice working set: RAM or spilled temp file.
pub enum SliceWriter {
    Mem(MemManager, Vec<u8>),
    File(std::fs::File),
}

impl SliceWriter {
    pub fn is_spilled(&self) -> bool {
        matches!(self, SliceWriter::File(_))
    }

    pub fn write_all(&mut self, data: &[u8]) -> Result<()> {
        match self {
            SliceWriter::Mem(_, buf) => {
                buf.extend_from_slice(data);
                Ok(())
            }
            SliceWriter::File(f) => {
                f.write_all(data)?;
                Ok(())
            }
        }
    }

    /// Read everything written so far.
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        match self {
            SliceWriter::Mem(mgr, buf) => {
                mgr.release(buf.capacity());
                Ok(buf)
            }
            SliceWriter::File(mut f) => {
                let mut out = Vec::new();
                f.seek(SeekFrom::Start(0))?;
                f.read_to_end(&mut out)?;
                Ok(out)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pressure_levels() {
        let mgr = MemManager::new(1000);
        assert_eq!(mgr.pressure(), MemPressure::Normal);
        let _a = mgr.alloc(600);
        assert_eq!(mgr.pressure(), MemPressure::High);
        let _b = mgr.alloc(200);
        assert_eq!(mgr.pressure(), MemPressure::Extreme);
        let _c = mgr.alloc(300);
        assert_eq!(mgr.pressure(), MemPressure::Oom);
    }

    #[test]
    fn test_alloc_release_on_drop() {
        let mgr = MemManager::new(1000);
        {
            let _buf = mgr.alloc(500);
            assert_eq!(mgr.used(), 500);
        }
        assert_eq!(mgr.used(), 0);
    }

    #[test]
    fn test_spill_decision() {
        let mgr = MemManager::new(100);
        // no pressure: RAM even for a large working set
        let w = mgr.slice_writer(OBJ_SIZE_HIGH_MEM).unwrap();
        assert!(!w.is_spilled());
        drop(w.into_bytes().unwrap());

        // high pressure + large size: spill
        let _hold = mgr.alloc(60);
        let w = mgr.slice_writer(OBJ_SIZE_HIGH_MEM).unwrap();
        assert!(w.is_spilled());

        // high pressure + small size: still RAM
        let w = mgr.slice_writer(1024).unwrap();
        assert!(!w.is_spilled());
    }

    #[test]
    fn test_writer_roundtrip() {
        let mgr = MemManager::new(100);
        let _hold = mgr.alloc(60);
        let mut w = mgr.slice_writer(OBJ_SIZE_HIGH_MEM).unwrap();
        assert!(w.is_spilled());
        w.write_all(b"chunk-a").unwrap();
        w.write_all(b"chunk-b").unwrap();
        assert_eq!(w.into_bytes().unwrap(), b"chunk-achunk-b");
    }
}

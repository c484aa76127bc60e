//! Local object metadata (LOM) and per-object locking.
//!
//! A LOM records where an object lives on this target and its attributes.
//! The rebalance send path acquires a shared lock (held across the async
//! transmit; released by the frame completion callback), while the receive
//! path takes an exclusive lock for the local write.

use crate::error::{Result, TalusError};
use crate::fs::{parse_fqn, ContentType, Mountpath, MountpathSet};
use crate::types::{Bck, Checksum, ObjAttrs};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

/// Local object metadata and location record.
#[derive(Debug, Clone)]
pub struct Lom {
    pub bck: Bck,
    pub objname: String,
    pub mpath: Mountpath,
    pub fqn: PathBuf,
    pub size: i64,
    pub atime: i64,
    pub version: String,
    pub cksum: Checksum,
}

impl Lom {
    /// Build a LOM from an on-disk FQN. Does not stat the file; call
    /// [`Lom::load`] for that.
    pub fn from_fqn(fqn: &Path, mpaths: &MountpathSet) -> Result<Self> {
        let parsed = parse_fqn(fqn, mpaths)?;
        if parsed.ct != ContentType::Object {
            return Err(TalusError::InvalidFqn(fqn.display().to_string()));
        }
        Ok(Self {
            bck: parsed.bck,
            objname: parsed.objname,
            mpath: parsed.mpath,
            fqn: fqn.to_path_buf(),
            size: 0,
            atime: 0,
            version: String::new(),
            cksum: Checksum::empty(),
        })
    }

    /// Place a new LOM on the given mountpath (receive path).
    pub fn place(bck: Bck, objname: &str, mpath: &Mountpath) -> Self {
        let fqn = mpath.fqn(&bck, ContentType::Object, objname);
        Self {
            bck,
            objname: objname.to_string(),
            mpath: mpath.clone(),
            fqn,
            size: 0,
            atime: 0,
            version: String::new(),
            cksum: Checksum::empty(),
        }
    }

    pub fn uname(&self) -> String {
        self.bck.uname(&self.objname)
    }

    /// Refresh size/atime from the filesystem.
    pub fn load(&mut self) -> Result<()> {
        let meta = std::fs::metadata(&self.fqn)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => TalusError::ObjectNotFound(self.uname()),
                _ => TalusError::Io(e),
            })?;
        self.size = meta.len() as i64;
        self.atime = meta
            .accessed()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos() as i64)
            .unwrap_or(0);
        Ok(())
    }

    /// Compute the content checksum if it is not already known.
    pub fn cksum_compute_if_missing(&mut self) -> Result<&Checksum> {
        if self.cksum.is_empty() {
            let data = std::fs::read(&self.fqn)?;
            self.cksum = Checksum::xxh3(&data);
        }
        Ok(&self.cksum)
    }

    pub fn attrs(&self) -> ObjAttrs {
        ObjAttrs {
            size: self.size,
            atime: self.atime,
            version: self.version.clone(),
            cksum_type: self.cksum.ty.clone(),
            cksum_value: self.cksum.value.clone(),
        }
    }

    /// Write object content and refresh metadata (receive path; caller must
    /// hold the exclusive lock).
    pub fn persist(&mut self, data: &[u8]) -> Result<()> {
        if let Some(parent) = self.fqn.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.fqn, data)?;
        self.size = data.len() as i64;
        self.cksum = Checksum::xxh3(data);
        Ok(())
    }

    /// Remove the local copy (post-ack source cleanup).
    pub fn delete(&self) -> Result<()> {
        match std::fs::remove_file(&self.fqn) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl std::fmt::Display for Lom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.bck, self.objname)
    }
}

const LOCK_SHARDS: usize = 64;

#[derive(Default)]
struct LockState {
    readers: u32,
    writer: bool,
}

struct LockShard {
    map: Mutex<HashMap<String, LockState>>,
    cv: Condvar,
}

/// Sharded per-object lock table keyed by uname.
///
/// Guards are plain handles (Send), so a shared lock taken on the send path
/// can be released later from the stream writer's completion callback.
pub struct LomLocker {
    shards: Vec<LockShard>,
}

impl Default for LomLocker {
    fn default() -> Self {
        Self::new()
    }
}

impl LomLocker {
    pub fn new() -> Self {
        Self {
            shards: (0..LOCK_SHARDS)
                .map(|_| LockShard {
                    map: Mutex::new(HashMap::new()),
                    cv: Condvar::new(),
                })
                .collect(),
        }
    }

    fn shard(&self, uname: &str) -> &LockShard {
        let h = xxhash_rust::xxh3::xxh3_64(uname.as_bytes()) as usize;
        &self.shards[h % LOCK_SHARDS]
    }

    /// Acquire a shared (read) lock, waiting out any writer.
    pub fn rlock(self: &Arc<Self>, uname: &str) -> RLockGuard {
        let shard = self.shard(uname);
        let mut map = shard.map.lock();
        loop {
            let state = map.entry(uname.to_string()).or_default();
            if !state.writer {
                state.readers += 1;
                return RLockGuard {
                    locker: Arc::clone(self),
                    uname: uname.to_string(),
                    released: false,
                };
            }
            shard.cv.wait(&mut map);
        }
    }

    /// Acquire an exclusive (write) lock.
    pub fn wlock(self: &Arc<Self>, uname: &str) -> WLockGuard {
        let shard = self.shard(uname);
        let mut map = shard.map.lock();
        loop {
            let state = map.entry(uname.to_string()).or_default();
            if !state.writer && state.readers == 0 {
                state.writer = true;
                return WLockGuard {
                    locker: Arc::clone(self),
                    uname: uname.to_string(),
                    released: false,
                };
            }
            shard.cv.wait(&mut map);
        }
    }

    fn runlock(&self, uname: &str) {
        let shard = self.shard(uname);
        let mut map = shard.map.lock();
        if let Some(state) = map.get_mut(uname) {
            state.readers = state.readers.saturating_sub(1);
            if state.readers == 0 && !state.writer {
                map.remove(uname);
            }
        }
        shard.cv.notify_all();
    }

    fn wunlock(&self, uname: &str) {
        let shard = self.shard(uname);
        let mut map = shard.map.lock();
        if let Some(state) = map.get_mut(uname) {
            state.writer = false;
            if state.readers == 0 {
                map.remove(uname);
            }
        }
        shard.cv.notify_all();
    }
}

/// Shared lock guard. Releases on drop, or explicitly via [`RLockGuard::unlock`].
pub struct RLockGuard {
    locker: Arc<LomLocker>,
    uname: String,
    released: bool,
}

impl RLockGuard {
    pub fn unlock(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.locker.runlock(&self.uname);
        }
    }
}

impl Drop for RLockGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// Exclusive lock guard.
pub struct WLockGuard {
    locker: Arc<LomLocker>,
    uname: String,
    released: bool,
}

impl WLockGuard {
    pub fn unlock(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.locker.wunlock(&self.uname);
        }
    }
}

impl Drop for WLockGuard {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lom_roundtrip_on_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let mpaths = MountpathSet::new(&[tmp.path().to_path_buf()]);
        let mpath = mpaths.first().unwrap().clone();

        let mut lom = Lom::place(Bck::native("bck1"), "dir/obj1", &mpath);
        lom.persist(b"hello world").unwrap();

        let mut loaded = Lom::from_fqn(&lom.fqn, &mpaths).unwrap();
        loaded.load().unwrap();
        assert_eq!(loaded.size, 11);
        assert_eq!(loaded.uname(), lom.uname());
        loaded.cksum_compute_if_missing().unwrap();
        assert_eq!(loaded.cksum, Checksum::xxh3(b"hello world"));

        lom.delete().unwrap();
        assert!(loaded.load().is_err());
    }

    #[test]
    fn test_shared_locks_coexist() {
        let locker = Arc::new(LomLocker::new());
        let g1 = locker.rlock("native/@/b/o");
        let g2 = locker.rlock("native/@/b/o");
        g1.unlock();
        g2.unlock();
        // exclusive acquires after both readers released
        let w = locker.wlock("native/@/b/o");
        w.unlock();
    }

    #[test]
    fn test_writer_blocks_reader() {
        let locker = Arc::new(LomLocker::new());
        let w = locker.wlock("native/@/b/o");

        let locker2 = Arc::clone(&locker);
        let handle = std::thread::spawn(move || {
            let g = locker2.rlock("native/@/b/o");
            g.unlock();
        });
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert!(!handle.is_finished());
        w.unlock();
        handle.join().unwrap();
    }

    #[test]
    fn test_guard_drop_releases() {
        let locker = Arc::new(LomLocker::new());
        {
            let _g = locker.rlock("native/@/b/o");
        }
        let w = locker.wlock("native/@/b/o");
        w.unlock();
    }
}

//! Mountpaths, on-disk layout, and object enumeration.
//!
//! Each mountpath is a directory (one filesystem by convention). Objects and
//! their EC companions live under per-bucket content-type directories:
//!
//! ```text
//! <mountpath>/native/<bucket>/obj/<objname>      main objects and replicas
//! <mountpath>/native/<bucket>/ec/<objname>%<n>   data and parity slices
//! <mountpath>/native/<bucket>/mt/<objname>%<n>   sidecar metadata (n = 0 for replicas)
//! ```
//!
//! Slice and metadata names carry the slice ordinal so that a target
//! transiently holding several slices of one object never aliases them onto
//! a single file.

mod marker;
mod walk;

pub use marker::{marker_exists, put_marker, rm_marker};
pub use walk::{list_buckets, walk};

use crate::error::{Result, TalusError};
use crate::types::{Bck, Provider};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Content type directories under a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentType {
    /// Main object or full replica.
    Object,
    /// EC data or parity slice.
    Slice,
    /// Sidecar metadata for a slice or replica.
    Meta,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Object => "obj",
            ContentType::Slice => "ec",
            ContentType::Meta => "mt",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "obj" => Some(ContentType::Object),
            "ec" => Some(ContentType::Slice),
            "mt" => Some(ContentType::Meta),
            _ => None,
        }
    }
}

/// A registered mountpath.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Mountpath {
    pub path: PathBuf,
}

impl Mountpath {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Fully qualified name of a main object on this mountpath.
    pub fn fqn(&self, bck: &Bck, ct: ContentType, objname: &str) -> PathBuf {
        self.path
            .join(bck.provider.as_str())
            .join(&bck.name)
            .join(ct.as_str())
            .join(objname)
    }

    /// Fully qualified name of an EC slice or its sidecar: the file name is
    /// `<objname>%<slice_id>` so distinct ordinals never alias.
    pub fn slice_fqn(&self, bck: &Bck, ct: ContentType, objname: &str, slice_id: u16) -> PathBuf {
        self.fqn(bck, ct, &slice_name(objname, slice_id))
    }

    /// Bucket content directory, e.g. `<mpath>/native/bck1/obj`.
    pub fn bucket_dir(&self, bck: &Bck, ct: ContentType) -> PathBuf {
        self.path
            .join(bck.provider.as_str())
            .join(&bck.name)
            .join(ct.as_str())
    }
}

/// On-disk name of one slice (or its sidecar) of an object.
pub fn slice_name(objname: &str, slice_id: u16) -> String {
    format!("{}%{}", objname, slice_id)
}

/// Split a slice/sidecar file name back into (objname, slice ordinal).
/// Returns `None` for names without a well-formed ordinal suffix.
pub fn split_slice_name(name: &str) -> Option<(&str, u16)> {
    let (objname, suffix) = name.rsplit_once('%')?;
    let slice_id = suffix.parse::<u16>().ok()?;
    if objname.is_empty() {
        return None;
    }
    Some((objname, slice_id))
}

/// Immutable snapshot of the mountpath set, taken once per rebalance run.
#[derive(Debug, Clone, Default)]
pub struct MountpathSet {
    pub available: Vec<Mountpath>,
}

impl MountpathSet {
    pub fn new(paths: &[PathBuf]) -> Self {
        Self {
            available: paths.iter().map(|p| Mountpath::new(p.clone())).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.available.len()
    }

    pub fn is_empty(&self) -> bool {
        self.available.is_empty()
    }

    pub fn first(&self) -> Option<&Mountpath> {
        self.available.first()
    }
}

/// Parsed components of an object FQN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFqn {
    pub mpath: Mountpath,
    pub bck: Bck,
    pub ct: ContentType,
    pub objname: String,
}

/// Parse `fqn` back into (mountpath, bucket, content type, object name).
/// The mountpath must be one of the snapshot's members and a prefix of the
/// path.
pub fn parse_fqn(fqn: &Path, mpaths: &MountpathSet) -> Result<ParsedFqn> {
    let mpath = mpaths
        .available
        .iter()
        .find(|m| fqn.starts_with(&m.path))
        .ok_or_else(|| TalusError::InvalidFqn(fqn.display().to_string()))?;
    let rel = fqn
        .strip_prefix(&mpath.path)
        .map_err(|_| TalusError::InvalidFqn(fqn.display().to_string()))?;

    let mut comps = rel.components().map(|c| c.as_os_str().to_string_lossy());
    let provider = comps
        .next()
        .and_then(|s| Provider::parse(&s))
        .ok_or_else(|| TalusError::InvalidFqn(fqn.display().to_string()))?;
    let bucket = comps
        .next()
        .ok_or_else(|| TalusError::InvalidFqn(fqn.display().to_string()))?
        .to_string();
    let ct = comps
        .next()
        .and_then(|s| ContentType::parse(&s))
        .ok_or_else(|| TalusError::InvalidFqn(fqn.display().to_string()))?;
    let objname: Vec<String> = comps.map(|s| s.to_string()).collect();
    if objname.is_empty() {
        return Err(TalusError::InvalidFqn(fqn.display().to_string()));
    }

    Ok(ParsedFqn {
        mpath: mpath.clone(),
        bck: Bck::new(bucket, provider, crate::types::Namespace::global()),
        ct,
        objname: objname.join("/"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fqn_roundtrip() {
        let mpaths = MountpathSet::new(&[PathBuf::from("/data/mp1"), PathBuf::from("/data/mp2")]);
        let bck = Bck::native("bck1");
        let mp = &mpaths.available[1];
        let fqn = mp.fqn(&bck, ContentType::Object, "dir/obj1");
        let parsed = parse_fqn(&fqn, &mpaths).unwrap();
        assert_eq!(parsed.bck, bck);
        assert_eq!(parsed.ct, ContentType::Object);
        assert_eq!(parsed.objname, "dir/obj1");
        assert_eq!(parsed.mpath.path, PathBuf::from("/data/mp2"));
    }

    #[test]
    fn test_parse_rejects_foreign_path() {
        let mpaths = MountpathSet::new(&[PathBuf::from("/data/mp1")]);
        let err = parse_fqn(Path::new("/other/native/bck/obj/x"), &mpaths);
        assert!(err.is_err());
    }

    #[test]
    fn test_parse_rejects_truncated() {
        let mpaths = MountpathSet::new(&[PathBuf::from("/data/mp1")]);
        // valid provider and content type, but no object name left
        assert!(parse_fqn(Path::new("/data/mp1/native/bck/obj"), &mpaths).is_err());
        // no bucket, no content type
        assert!(parse_fqn(Path::new("/data/mp1/native"), &mpaths).is_err());
        // unknown provider token
        assert!(parse_fqn(Path::new("/data/mp1/ais/bck/obj/x"), &mpaths).is_err());
    }

    #[test]
    fn test_slice_name_roundtrip() {
        assert_eq!(slice_name("dir/obj1", 3), "dir/obj1%3");
        assert_eq!(split_slice_name("dir/obj1%3"), Some(("dir/obj1", 3)));
        assert_eq!(split_slice_name("obj%0"), Some(("obj", 0)));
        // dots in object names do not confuse the suffix
        assert_eq!(split_slice_name("train/0001.tar%12"), Some(("train/0001.tar", 12)));
        assert_eq!(split_slice_name("plain-object"), None);
        assert_eq!(split_slice_name("obj%notanum"), None);
        assert_eq!(split_slice_name("%4"), None);
    }

    #[test]
    fn test_slice_fqn_distinct_per_ordinal() {
        let mp = Mountpath::new("/data/mp1");
        let bck = Bck::native("bck1");
        let a = mp.slice_fqn(&bck, ContentType::Slice, "obj1", 1);
        let b = mp.slice_fqn(&bck, ContentType::Slice, "obj1", 2);
        assert_ne!(a, b);
        assert!(a.ends_with("ec/obj1%1"));
        let m = mp.slice_fqn(&bck, ContentType::Meta, "obj1", 0);
        assert!(m.ends_with("mt/obj1%0"));
    }
}

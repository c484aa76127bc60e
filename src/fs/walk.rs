//! Recursive enumeration of object files on a mountpath.

use crate::error::Result;
use crate::fs::{ContentType, Mountpath};
use crate::types::Bck;
use std::fs;
use std::path::Path;

/// Walk all regular files of one content type under `<mpath>/<bck>` and
/// invoke `cb` for each. A callback error stops the walk immediately (this
/// is how joggers abort mid-traversal). A missing bucket directory is not an
/// error - the bucket simply has no local content.
pub fn walk<F>(mpath: &Mountpath, bck: &Bck, ct: ContentType, cb: &mut F) -> Result<()>
where
    F: FnMut(&Path) -> Result<()>,
{
    let root = mpath.bucket_dir(bck, ct);
    if !root.exists() {
        return Ok(());
    }
    walk_dir(&root, cb)
}

fn walk_dir<F>(dir: &Path, cb: &mut F) -> Result<()>
where
    F: FnMut(&Path) -> Result<()>,
{
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let ftype = entry.file_type()?;
        if ftype.is_dir() {
            walk_dir(&path, cb)?;
        } else if ftype.is_file() {
            cb(&path)?;
        }
        // symlinks and specials are skipped
    }
    Ok(())
}

/// Enumerate bucket names that have content of type `ct` for `provider`
/// on this mountpath.
pub fn list_buckets(mpath: &Mountpath, provider: crate::types::Provider) -> Result<Vec<String>> {
    let root = mpath.path.join(provider.as_str());
    if !root.exists() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for entry in fs::read_dir(&root)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            out.push(entry.file_name().to_string_lossy().to_string());
        }
    }
    out.sort();
    Ok(out)
}

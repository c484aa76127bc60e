//! In-progress marker file.
//!
//! Created when a rebalance run initializes, removed on clean completion.
//! Its presence at startup is informational only; recovery is not automatic.

use crate::error::Result;
use crate::fs::MountpathSet;
use std::fs;
use std::path::PathBuf;

const MARKER_DIR: &str = ".talus";

fn marker_path(mpaths: &MountpathSet, action: &str) -> Option<PathBuf> {
    mpaths
        .first()
        .map(|m| m.path.join(MARKER_DIR).join(format!("{}.inprogress", action)))
}

/// Persist the in-progress marker for `action` on the first mountpath.
pub fn put_marker(mpaths: &MountpathSet, action: &str) -> Result<()> {
    if let Some(path) = marker_path(mpaths, action) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, b"")?;
    }
    Ok(())
}

/// Remove the marker. Missing marker is not an error.
pub fn rm_marker(mpaths: &MountpathSet, action: &str) -> Result<()> {
    if let Some(path) = marker_path(mpaths, action) {
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

pub fn marker_exists(mpaths: &MountpathSet, action: &str) -> bool {
    marker_path(mpaths, action).map(|p| p.exists()).unwrap_or(false)
}

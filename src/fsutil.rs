// src/fsutil.rs

//! Filesystem helpers for the work area
//!
//! Recursive copies follow the aggregation rule of the layout: copying a
//! tree over an existing one overwrites files in place, so the last writer
//! wins for any conflicting path. Deletion during close is best-effort and
//! never surfaces errors.

use std::fs;
use std::path::Path;

use tracing::warn;
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// Create a directory and its parents
pub fn mkdirs(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|source| Error::MkdirFailed {
        path: path.to_path_buf(),
        source,
    })
}

/// Recursively copy `src` into `dst`, overwriting existing files.
///
/// Directory structure is merged; files already present under `dst` that the
/// source does not provide are left alone.
pub fn copy_recursive(src: &Path, dst: &Path) -> Result<()> {
    for entry in WalkDir::new(src) {
        let entry = entry.map_err(|e| Error::ReadDirFailed {
            path: e
                .path()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| src.to_path_buf()),
            source: e
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::other("walk error")),
        })?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .expect("walked path is under its root");
        let target = dst.join(relative);
        if entry.file_type().is_dir() {
            mkdirs(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                mkdirs(parent)?;
            }
            fs::copy(entry.path(), &target).map_err(|source| Error::CopyFailed {
                src: entry.path().to_path_buf(),
                dst: target.clone(),
                source,
            })?;
        }
    }
    Ok(())
}

/// Copy a single file, overwriting the destination
pub fn copy_file(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        mkdirs(parent)?;
    }
    fs::copy(src, dst).map(|_| ()).map_err(|source| Error::CopyFailed {
        src: src.to_path_buf(),
        dst: dst.to_path_buf(),
        source,
    })
}

/// Remove everything inside `dir`, keeping the directory itself
pub fn empty_dir(dir: &Path) -> Result<()> {
    let entries = fs::read_dir(dir).map_err(|source| Error::ReadDirFailed {
        path: dir.to_path_buf(),
        source,
    })?;
    for entry in entries {
        let entry = entry.map_err(|source| Error::ReadDirFailed {
            path: dir.to_path_buf(),
            source,
        })?;
        remove_best_effort(&entry.path());
    }
    Ok(())
}

/// Recursively delete a path, swallowing errors
pub fn remove_best_effort(path: &Path) {
    let outcome = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    if let Err(e) = outcome {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("failed to remove {}: {}", path.display(), e);
        }
    }
}

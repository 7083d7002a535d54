//! Local filesystem plumbing for the sync engine.
//!
//! Downloads land in a temp file next to their target and are renamed into
//! place, so readers never observe a half-written file. Local deletions
//! honor the caller's filter: excluded entries survive, and a directory is
//! only removed once everything the filter accepts below it is gone.

use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};

use crate::error::SyncError;
use crate::fileinfo::FileInfo;
use crate::path::join_name;
use crate::sync::Filter;

/// Map a canonical sync path onto the local directory.
pub fn to_local_path(root: &Path, sync_path: &str) -> PathBuf {
    let relative = sync_path.trim_start_matches('/');
    if relative.is_empty() {
        root.to_path_buf()
    } else {
        root.join(relative)
    }
}

/// The local mtime of a file, truncated to millisecond precision so it
/// compares stably against persisted values.
pub fn file_mtime(path: &Path) -> Option<DateTime<Utc>> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    let stamp: DateTime<Utc> = modified.into();
    Utc.timestamp_millis_opt(stamp.timestamp_millis()).single()
}

/// Atomically replace `path` with `data` (write-to-temp + rename),
/// creating parent directories as needed.
pub fn atomic_write(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            std::fs::create_dir_all(parent)?;
            parent.to_path_buf()
        }
        _ => PathBuf::from("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    std::io::Write::write_all(&mut tmp, data)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Delete the local resource at `sync_path` below `root`.
///
/// Files are removed directly. Directories are swept recursively, skipping
/// entries the filter rejects: first all accepted files, then the emptied
/// directories bottom-up, then the directory itself. An already-absent
/// resource counts as success.
pub fn delete_local_tree(
    root: &Path,
    sync_path: &str,
    filter: &Filter,
) -> Result<(), SyncError> {
    let full = to_local_path(root, sync_path);
    let meta = match std::fs::symlink_metadata(&full) {
        Ok(meta) => meta,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(source) => {
            return Err(SyncError::FailedDeletingLocal {
                path: sync_path.to_string(),
                message: source.to_string(),
            })
        }
    };

    if meta.is_dir() {
        delete_dir_contents(root, sync_path, &full, filter)?;
        std::fs::remove_dir(&full).map_err(|source| SyncError::FailedDeletingLocal {
            path: sync_path.to_string(),
            message: source.to_string(),
        })?;
    } else {
        std::fs::remove_file(&full).map_err(|source| SyncError::FailedDeletingLocal {
            path: sync_path.to_string(),
            message: source.to_string(),
        })?;
    }
    Ok(())
}

fn delete_dir_contents(
    root: &Path,
    sync_path: &str,
    full: &Path,
    filter: &Filter,
) -> Result<(), SyncError> {
    let entries = std::fs::read_dir(full).map_err(|source| SyncError::FailedDeletingLocal {
        path: sync_path.to_string(),
        message: source.to_string(),
    })?;
    for entry in entries {
        let entry = entry.map_err(|source| SyncError::FailedDeletingLocal {
            path: sync_path.to_string(),
            message: source.to_string(),
        })?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let child_sync_path = join_name(sync_path, &name);
        let info = FileInfo::from_local_file(&entry.path());
        if !filter(&child_sync_path, &info) {
            continue;
        }
        if info.is_directory() {
            delete_dir_contents(root, &child_sync_path, &entry.path(), filter)?;
            std::fs::remove_dir(entry.path()).map_err(|source| {
                SyncError::FailedDeletingLocal {
                    path: child_sync_path.clone(),
                    message: source.to_string(),
                }
            })?;
        } else {
            std::fs::remove_file(entry.path()).map_err(|source| {
                SyncError::FailedDeletingLocal {
                    path: child_sync_path.clone(),
                    message: source.to_string(),
                }
            })?;
        }
    }
    Ok(())
}

//! Persistent sync-state storage.
//!
//! Between runs the engine remembers, for every synchronized path, the
//! local modification time and the remote sync-attribute observed at the
//! end of the last successful transfer. Two interchangeable stores exist:
//! a single-table SQLite database ([`SqliteSyncStateDatabase`]) and a
//! nested JSON document ([`JsonSyncStateDatabase`]).

mod json;
mod sqlite;

pub use json::JsonSyncStateDatabase;
pub use sqlite::SqliteSyncStateDatabase;

use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use crate::error::StateError;
use crate::path::make_path;

/// One row of the sync-state database.
///
/// An entry stored in the database represents a path that was known-good at
/// the end of some prior sync run - or the special root marker `/`, which
/// records that the first-sync bootstrap completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStateEntry {
    path: String,
    modification_time: Option<DateTime<Utc>>,
    sync_property: String,
}

impl SyncStateEntry {
    /// Create an entry; the path is canonicalized.
    pub fn new(
        path: impl AsRef<str>,
        modification_time: Option<DateTime<Utc>>,
        sync_property: impl Into<String>,
    ) -> Self {
        Self {
            path: make_path(path.as_ref()),
            modification_time,
            sync_property: sync_property.into(),
        }
    }

    /// The canonical sync path of the entry.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Local mtime captured when the path was last synced. `None` for
    /// directories and for entries that never had a local counterpart.
    pub fn modification_time(&self) -> Option<DateTime<Utc>> {
        self.modification_time
    }

    /// Remote sync-attribute captured when the path was last synced; empty
    /// if the backend never supplied one.
    pub fn sync_property(&self) -> &str {
        &self.sync_property
    }
}

/// Keyed store of [`SyncStateEntry`] values, living across sync runs.
///
/// Implementations must treat paths as canonical (callers pass them through
/// [`make_path`] semantics already). All operations report storage-layer
/// failures as [`StateError`]; the synchronizer treats those as fatal for
/// the run.
pub trait SyncStateDatabase {
    /// Acquire the underlying storage. Opening a database that does not
    /// exist yet creates it empty. Opening twice without an intervening
    /// close is an error.
    fn open(&mut self) -> Result<(), StateError>;

    /// Release the underlying storage, flushing pending data.
    fn close(&mut self) -> Result<(), StateError>;

    /// Whether the database is currently open.
    fn is_open(&self) -> bool;

    /// Insert or overwrite an entry, keyed by its path.
    fn put(&mut self, entry: &SyncStateEntry) -> Result<(), StateError>;

    /// Exact-match lookup.
    fn get(&self, path: &str) -> Result<Option<SyncStateEntry>, StateError>;

    /// Direct children of `path` - not recursive, and not including the
    /// path itself.
    fn children(&self, path: &str) -> Result<Vec<SyncStateEntry>, StateError>;

    /// Remove the entry at `path` and every descendant. Idempotent.
    fn delete_subtree(&mut self, path: &str) -> Result<(), StateError>;

    /// Remove only the entry at `path`; descendants survive. Used when a
    /// directory's own record must be invalidated while a recursive sweep
    /// is still pending.
    fn delete_one(&mut self, path: &str) -> Result<(), StateError>;

    /// BFS over the subtree rooted at `root`, invoking `callback` on every
    /// stored entry found, including the root itself if present.
    fn iterate(
        &self,
        root: &str,
        callback: &mut dyn FnMut(&SyncStateEntry),
    ) -> Result<(), StateError> {
        let root = make_path(root);
        if let Some(entry) = self.get(&root)? {
            callback(&entry);
        }
        let mut queue = VecDeque::new();
        queue.push_back(root);
        while let Some(folder) = queue.pop_front() {
            for entry in self.children(&folder)? {
                callback(&entry);
                queue.push_back(entry.path().to_string());
            }
        }
        Ok(())
    }
}

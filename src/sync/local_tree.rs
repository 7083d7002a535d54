//! Local change-tree builder.
//!
//! Walks the local directory breadth-first, comparing what is on disk
//! against the sync-state database: unknown entries are created, known
//! files with a different mtime are changed, and database entries with no
//! local counterpart are deleted (recursively, via the stored subtree).

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::path::Path;

use crate::error::SyncError;
use crate::fileinfo::FileInfo;
use crate::path::join_name;
use crate::state::{SyncStateDatabase, SyncStateEntry};
use crate::sync::writer::{file_mtime, to_local_path};
use crate::sync::Filter;
use crate::tree::{ChangeKind, ChangeTree, NodeKind};

fn children_by_path(
    db: &dyn SyncStateDatabase,
    path: &str,
) -> Result<BTreeMap<String, SyncStateEntry>, SyncError> {
    let entries = db
        .children(path)
        .map_err(|source| SyncError::SyncStateDatabaseLookupFailed {
            path: path.to_string(),
            source,
        })?;
    Ok(entries
        .into_iter()
        .map(|e| (e.path().to_string(), e))
        .collect())
}

/// Mark the whole stored subtree at `path` as deleted, carrying the
/// previously recorded metadata on every node.
fn mark_subtree_deleted(
    db: &dyn SyncStateDatabase,
    tree: &mut ChangeTree,
    path: &str,
) -> Result<(), SyncError> {
    db.iterate(path, &mut |entry| {
        let node = tree.node_mut(entry.path());
        node.change = ChangeKind::Deleted;
        node.modified = entry.modification_time();
        node.sync_attribute = entry.sync_property().to_string();
    })
    .map_err(|source| SyncError::SyncStateDatabaseLookupFailed {
        path: path.to_string(),
        source,
    })
}

/// Build the local change tree for `local_dir` against the database.
pub fn build_local_change_tree(
    db: &dyn SyncStateDatabase,
    local_dir: &Path,
    filter: &Filter,
) -> Result<ChangeTree, SyncError> {
    let mut tree = ChangeTree::new();
    let mut queue = VecDeque::new();
    queue.push_back("/".to_string());

    while let Some(path) = queue.pop_front() {
        let previous = children_by_path(db, &path)?;
        let dir = to_local_path(local_dir, &path);
        let mut handled: HashSet<String> = HashSet::new();

        let read_dir = match std::fs::read_dir(&dir) {
            Ok(iter) => Some(iter),
            // A directory that vanished mid-run reads as empty; its stored
            // entries then fall out as deletions below.
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
            Err(source) => {
                return Err(SyncError::OpeningLocalFileFailed {
                    path: path.clone(),
                    source,
                })
            }
        };

        for dir_entry in read_dir.into_iter().flatten() {
            let dir_entry = dir_entry.map_err(|source| SyncError::OpeningLocalFileFailed {
                path: path.clone(),
                source,
            })?;
            let name = dir_entry.file_name().to_string_lossy().into_owned();
            let entry_path = join_name(&path, &name);
            handled.insert(entry_path.clone());

            let info = FileInfo::from_local_file(&dir_entry.path());
            if !filter(&entry_path, &info) {
                continue;
            }

            let is_dir = info.is_directory();
            match previous.get(&entry_path) {
                Some(previous_entry) => {
                    if is_dir {
                        // The database cannot tell whether descendants
                        // changed; always descend.
                        queue.push_back(entry_path);
                    } else {
                        let mtime = file_mtime(&dir_entry.path());
                        let had_children = !db
                            .children(&entry_path)
                            .map_err(|source| SyncError::SyncStateDatabaseLookupFailed {
                                path: entry_path.clone(),
                                source,
                            })?
                            .is_empty();
                        if had_children {
                            // A directory was replaced by a file: the
                            // stored subtree is gone.
                            mark_subtree_deleted(db, &mut tree, &entry_path)?;
                        }
                        if had_children || mtime != previous_entry.modification_time() {
                            let node = tree.node_mut(&entry_path);
                            node.kind = NodeKind::File;
                            node.change = ChangeKind::Changed;
                            node.modified = mtime;
                            node.sync_attribute = previous_entry.sync_property().to_string();
                        }
                    }
                }
                None => {
                    let node = tree.node_mut(&entry_path);
                    node.change = ChangeKind::Created;
                    if is_dir {
                        node.kind = NodeKind::Directory;
                        queue.push_back(entry_path);
                    } else {
                        node.kind = NodeKind::File;
                        node.modified = file_mtime(&dir_entry.path());
                    }
                }
            }
        }

        // Entries from the last run with no local counterpart were deleted.
        for previous_entry in previous.values() {
            if !handled.contains(previous_entry.path()) {
                mark_subtree_deleted(db, &mut tree, previous_entry.path())?;
            }
        }
    }

    tree.normalize();
    Ok(tree)
}

//! Remote change-tree builder.
//!
//! Two strategies, selected by the backend's change-detection mode. In
//! folder mode each folder's sync-attribute is compared against the stored
//! one and unchanged subtrees are pruned; listings run concurrently up to
//! the job limit, draining a single shared queue. In cursor mode one
//! recursive listing at the root yields every change since the stored
//! cursor.

use std::collections::{BTreeMap, HashSet, VecDeque};

use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use tracing::debug;

use crate::error::SyncError;
use crate::path::make_path;
use crate::remote::{ChangeDetectionMode, ListFilesResult, ListOptions, RemoteBackend};
use crate::state::{SyncStateDatabase, SyncStateEntry};
use crate::sync::{Filter, StopState};
use crate::tree::{ChangeKind, ChangeTree, NodeKind};

/// The remote tree plus, in cursor mode, the cursor to persist after a
/// clean run.
pub struct RemoteTreeOutcome {
    pub tree: ChangeTree,
    pub cursor: Option<String>,
}

/// Join the backend's remote root with a canonical sync path.
pub fn remote_path(remote_dir: &str, sync_path: &str) -> String {
    make_path(&format!("{remote_dir}/{sync_path}"))
}

fn lookup(
    db: &dyn SyncStateDatabase,
    path: &str,
) -> Result<Option<SyncStateEntry>, SyncError> {
    db.get(path)
        .map_err(|source| SyncError::SyncStateDatabaseLookupFailed {
            path: path.to_string(),
            source,
        })
}

/// Build the remote change tree.
pub async fn build_remote_change_tree(
    backend: &dyn RemoteBackend,
    db: &dyn SyncStateDatabase,
    remote_dir: &str,
    filter: &Filter,
    max_jobs: usize,
    stop: &StopState,
) -> Result<RemoteTreeOutcome, SyncError> {
    match backend.change_detection_mode() {
        ChangeDetectionMode::FolderSyncAttributes => {
            let tree = build_folder_mode(backend, db, remote_dir, filter, max_jobs, stop).await?;
            Ok(RemoteTreeOutcome { tree, cursor: None })
        }
        ChangeDetectionMode::RootStreamCursor => {
            build_cursor_mode(backend, db, remote_dir, filter).await
        }
    }
}

async fn build_folder_mode(
    backend: &dyn RemoteBackend,
    db: &dyn SyncStateDatabase,
    remote_dir: &str,
    filter: &Filter,
    max_jobs: usize,
    stop: &StopState,
) -> Result<ChangeTree, SyncError> {
    let mut tree = ChangeTree::new();
    let mut queue: VecDeque<String> = VecDeque::new();
    queue.push_back("/".to_string());

    let mut in_flight: FuturesUnordered<_> = FuturesUnordered::new();

    loop {
        if stop.is_stopped() {
            return Err(SyncError::Stopped);
        }
        while in_flight.len() < max_jobs {
            let Some(folder) = queue.pop_front() else {
                break;
            };
            debug!(%folder, "scanning remote folder for changes");
            let target = remote_path(remote_dir, &folder);
            in_flight.push(
                async move {
                    let result = backend.list_files(&target, ListOptions::default()).await;
                    (folder, result)
                }
                .boxed_local(),
            );
        }
        let Some((folder, result)) = in_flight.next().await else {
            break;
        };
        let listing = result.map_err(|source| SyncError::FailedListingRemoteFolder {
            path: folder.clone(),
            source,
        })?;
        process_folder_listing(backend, db, filter, &mut tree, &mut queue, &folder, listing)?;
    }

    tree.normalize();
    Ok(tree)
}

fn process_folder_listing(
    backend: &dyn RemoteBackend,
    db: &dyn SyncStateDatabase,
    filter: &Filter,
    tree: &mut ChangeTree,
    queue: &mut VecDeque<String>,
    folder: &str,
    listing: ListFilesResult,
) -> Result<(), SyncError> {
    let folder_attr = listing.folder.sync_attribute().to_string();
    let stored_attr = lookup(db, folder)?
        .map(|e| e.sync_property().to_string())
        .unwrap_or_default();

    let unchanged = !folder_attr.is_empty() && folder_attr == stored_attr;
    if unchanged {
        if backend.always_check_subfolders() {
            // Folder attributes of this server do not cover the subtree;
            // descend even though this level is unchanged.
            for entry in &listing.entries {
                let child_path = make_path(&format!("{}/{}", folder, entry.path));
                if entry.info.is_directory() && filter(&child_path, &entry.info) {
                    queue.push_back(child_path);
                }
            }
        }
        return Ok(());
    }

    debug!(%folder, "change in remote folder detected");
    {
        let node = tree.node_mut(folder);
        node.kind = NodeKind::Directory;
        node.change = if stored_attr.is_empty() {
            ChangeKind::Created
        } else {
            ChangeKind::Changed
        };
        node.sync_attribute = folder_attr;
    }

    let previous: BTreeMap<String, SyncStateEntry> = db
        .children(folder)
        .map_err(|source| SyncError::SyncStateDatabaseLookupFailed {
            path: folder.to_string(),
            source,
        })?
        .into_iter()
        .map(|e| (e.path().to_string(), e))
        .collect();
    let mut handled: HashSet<String> = HashSet::new();

    for entry in listing.entries {
        let child_path = make_path(&format!("{}/{}", folder, entry.path));
        handled.insert(child_path.clone());
        if !filter(&child_path, &entry.info) {
            continue;
        }

        let stored_child_attr = previous
            .get(&child_path)
            .map(|e| e.sync_property().to_string())
            .unwrap_or_default();
        let entry_attr = entry.info.sync_attribute();
        if entry_attr != stored_child_attr || entry_attr.is_empty() {
            let is_dir = entry.info.is_directory();
            let node = tree.node_mut(&child_path);
            node.kind = if is_dir {
                NodeKind::Directory
            } else {
                NodeKind::File
            };
            node.change = if stored_child_attr.is_empty() {
                ChangeKind::Created
            } else {
                ChangeKind::Changed
            };
            node.sync_attribute = entry_attr.to_string();
            if is_dir {
                queue.push_back(child_path);
            }
        } else if entry.info.is_directory() && backend.always_check_subfolders() {
            queue.push_back(child_path);
        }
    }

    // Stored children missing from the listing were deleted remotely.
    for previous_entry in previous.values() {
        if !handled.contains(previous_entry.path()) {
            db.iterate(previous_entry.path(), &mut |entry| {
                let node = tree.node_mut(entry.path());
                node.change = ChangeKind::Deleted;
                node.modified = entry.modification_time();
                node.sync_attribute = entry.sync_property().to_string();
            })
            .map_err(|source| SyncError::SyncStateDatabaseLookupFailed {
                path: previous_entry.path().to_string(),
                source,
            })?;
        }
    }

    Ok(())
}

async fn build_cursor_mode(
    backend: &dyn RemoteBackend,
    db: &dyn SyncStateDatabase,
    remote_dir: &str,
    filter: &Filter,
) -> Result<RemoteTreeOutcome, SyncError> {
    let cursor = lookup(db, "/")?
        .map(|e| e.sync_property().to_string())
        .filter(|c| !c.is_empty());

    let listing = backend
        .list_files(
            &make_path(remote_dir),
            ListOptions {
                recursive: true,
                cursor,
            },
        )
        .await
        .map_err(|source| SyncError::FailedListingRemoteFolder {
            path: "/".to_string(),
            source,
        })?;

    let mut tree = ChangeTree::new();
    for entry in listing.entries {
        let child_path = make_path(&entry.path);
        if !filter(&child_path, &entry.info) {
            continue;
        }
        if entry.info.is_deleted() {
            let stored = lookup(db, &child_path)?;
            let node = tree.node_mut(&child_path);
            node.change = ChangeKind::Deleted;
            if let Some(stored) = stored {
                node.modified = stored.modification_time();
                node.sync_attribute = stored.sync_property().to_string();
            }
            continue;
        }

        let stored_attr = lookup(db, &child_path)?
            .map(|e| e.sync_property().to_string())
            .unwrap_or_default();
        let entry_attr = entry.info.sync_attribute();
        if !entry_attr.is_empty() && entry_attr == stored_attr {
            continue;
        }
        let is_dir = entry.info.is_directory();
        let node = tree.node_mut(&child_path);
        node.kind = if is_dir {
            NodeKind::Directory
        } else {
            NodeKind::File
        };
        node.change = if stored_attr.is_empty() {
            ChangeKind::Created
        } else {
            ChangeKind::Changed
        };
        node.sync_attribute = entry_attr.to_string();
    }

    tree.normalize();
    Ok(RemoteTreeOutcome {
        tree,
        cursor: listing.cursor,
    })
}

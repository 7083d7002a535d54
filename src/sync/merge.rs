//! Merge planner.
//!
//! Walks the union of the local and remote change trees top-down and
//! derives one action per differing path, resolving conflicts under the
//! active [`ConflictStrategy`]. Combinations that cannot arise from a
//! consistent history ("local created, remote changed") are reported as
//! warnings and resolved with the closest sensible interpretation.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::error::SyncError;
use crate::state::{SyncStateDatabase, SyncStateEntry};
use crate::sync::actions::{PlannedAction, SyncAction};
use crate::sync::ConflictStrategy;
use crate::tree::{ChangeKind, ChangeNode, ChangeTree, NodeKind};

/// The product of merging the two change trees.
#[derive(Default)]
pub struct MergeOutcome {
    pub actions: Vec<PlannedAction>,
    /// Human-readable notes about impossible change combinations.
    pub warnings: Vec<String>,
}

struct Planner<'a> {
    db: &'a dyn SyncStateDatabase,
    strategy: ConflictStrategy,
    outcome: MergeOutcome,
}

/// Merge `local` and `remote` into an ordered action list.
pub fn merge_change_trees(
    db: &dyn SyncStateDatabase,
    strategy: ConflictStrategy,
    local: &ChangeTree,
    remote: &ChangeTree,
) -> Result<MergeOutcome, SyncError> {
    local.dump("local change tree");
    remote.dump("remote change tree");

    let mut planner = Planner {
        db,
        strategy,
        outcome: MergeOutcome::default(),
    };

    let mut paths: VecDeque<String> = VecDeque::new();
    paths.extend(ChangeTree::merged_child_names(
        Some(local.root()),
        Some(remote.root()),
        "/",
    ));

    while let Some(path) = paths.pop_front() {
        let local_node = local.node(&path);
        let remote_node = remote.node(&path);
        planner.merge_nodes(&path, local_node, remote_node)?;
        paths.extend(ChangeTree::merged_child_names(local_node, remote_node, &path));
    }

    Ok(planner.outcome)
}

impl Planner<'_> {
    fn merge_nodes(
        &mut self,
        path: &str,
        local: Option<&ChangeNode>,
        remote: Option<&ChangeNode>,
    ) -> Result<(), SyncError> {
        let empty = ChangeNode::default();
        let local = local.unwrap_or(&empty);
        let remote = remote.unwrap_or(&empty);
        match self.strategy {
            ConflictStrategy::LocalWins => self.merge_local_wins(path, local, remote),
            ConflictStrategy::RemoteWins => self.merge_remote_wins(path, local, remote),
        }
    }

    fn previous(&self, path: &str) -> Result<Option<SyncStateEntry>, SyncError> {
        self.db
            .get(path)
            .map_err(|source| SyncError::SyncStateDatabaseLookupFailed {
                path: path.to_string(),
                source,
            })
    }

    fn emit(&mut self, action: SyncAction) {
        self.outcome.actions.push(PlannedAction::new(action));
    }

    /// Emit an upload; if the path still has recorded children it used to
    /// be a directory, so the remote counterpart is deleted first.
    fn emit_upload(
        &mut self,
        path: &str,
        previous: Option<SyncStateEntry>,
        modified: Option<DateTime<Utc>>,
    ) -> Result<(), SyncError> {
        let had_children = !self
            .db
            .children(path)
            .map_err(|source| SyncError::SyncStateDatabaseLookupFailed {
                path: path.to_string(),
                source,
            })?
            .is_empty();
        if had_children {
            self.emit(SyncAction::DeleteRemote {
                path: path.to_string(),
                previous: previous.clone(),
            });
        }
        self.emit(SyncAction::UploadFile {
            path: path.to_string(),
            previous,
            modified,
        });
        Ok(())
    }

    fn impossible(&mut self, path: &str, description: &str) {
        let message = format!("impossible sync conflict on {path}: {description}");
        warn!("{message}");
        self.outcome.warnings.push(message);
    }

    fn merge_local_wins(
        &mut self,
        path: &str,
        local: &ChangeNode,
        remote: &ChangeNode,
    ) -> Result<(), SyncError> {
        match local.change {
            ChangeKind::Unknown => match remote.change {
                ChangeKind::Unknown => {}
                ChangeKind::Created | ChangeKind::Changed => {
                    if remote.kind == NodeKind::Directory {
                        self.emit(SyncAction::MkDirLocal {
                            path: path.to_string(),
                            sync_attribute: remote.sync_attribute.clone(),
                        });
                    } else {
                        let previous = if remote.change == ChangeKind::Created {
                            None
                        } else {
                            self.previous(path)?
                        };
                        self.emit(SyncAction::DownloadFile {
                            path: path.to_string(),
                            previous,
                            sync_attribute: remote.sync_attribute.clone(),
                        });
                    }
                }
                ChangeKind::Deleted => {
                    if local.kind == NodeKind::Directory && local.has_change(ChangeKind::Created)
                    {
                        // Live content below: re-create the remote folder
                        // instead of honoring the delete.
                        self.emit(SyncAction::MkDirRemote {
                            path: path.to_string(),
                        });
                    } else {
                        let previous = self.previous(path)?;
                        self.emit(SyncAction::DeleteLocal {
                            path: path.to_string(),
                            previous,
                        });
                    }
                }
            },
            ChangeKind::Created => match remote.change {
                ChangeKind::Unknown => {
                    if local.kind == NodeKind::File {
                        self.emit_upload(path, None, local.modified)?;
                    } else if local.kind == NodeKind::Directory {
                        self.emit(SyncAction::MkDirRemote {
                            path: path.to_string(),
                        });
                    }
                }
                ChangeKind::Created => {
                    // Both sides created the path; local wins. A type
                    // mismatch deletes the remote version first.
                    if local.kind == NodeKind::File {
                        if remote.kind == NodeKind::Directory {
                            self.emit(SyncAction::DeleteRemote {
                                path: path.to_string(),
                                previous: None,
                            });
                        }
                        self.emit(SyncAction::UploadFile {
                            path: path.to_string(),
                            previous: None,
                            modified: local.modified,
                        });
                    } else if local.kind == NodeKind::Directory {
                        if remote.kind == NodeKind::File {
                            self.emit(SyncAction::DeleteRemote {
                                path: path.to_string(),
                                previous: None,
                            });
                        }
                        self.emit(SyncAction::MkDirRemote {
                            path: path.to_string(),
                        });
                    }
                }
                ChangeKind::Changed => self.impossible(path, "local created, remote changed"),
                ChangeKind::Deleted => self.impossible(path, "local created, remote deleted"),
            },
            ChangeKind::Changed => match remote.change {
                ChangeKind::Unknown | ChangeKind::Changed => {
                    if local.kind == NodeKind::File {
                        let previous = self.previous(path)?;
                        self.emit_upload(path, previous, local.modified)?;
                    }
                }
                ChangeKind::Created => self.impossible(path, "local changed, remote created"),
                ChangeKind::Deleted => {
                    if local.kind == NodeKind::File {
                        // Remote deleted the file, but local wins: rescue
                        // it by re-uploading.
                        let previous = self.previous(path)?;
                        self.emit_upload(path, previous, local.modified)?;
                    } else {
                        self.impossible(path, "local folder changed, remote deleted");
                    }
                }
            },
            ChangeKind::Deleted => match remote.change {
                ChangeKind::Unknown | ChangeKind::Changed => {
                    if remote.kind == NodeKind::Directory
                        && remote.has_change(ChangeKind::Created)
                    {
                        // New remote content below the deleted folder:
                        // re-materialize it locally instead.
                        self.emit(SyncAction::MkDirLocal {
                            path: path.to_string(),
                            sync_attribute: remote.sync_attribute.clone(),
                        });
                    } else {
                        let previous = self.previous(path)?;
                        self.emit(SyncAction::DeleteRemote {
                            path: path.to_string(),
                            previous,
                        });
                    }
                }
                ChangeKind::Created => self.impossible(path, "local deleted, remote created"),
                ChangeKind::Deleted => {}
            },
        }
        Ok(())
    }

    fn merge_remote_wins(
        &mut self,
        path: &str,
        local: &ChangeNode,
        remote: &ChangeNode,
    ) -> Result<(), SyncError> {
        match local.change {
            ChangeKind::Unknown => match remote.change {
                ChangeKind::Unknown => {}
                ChangeKind::Created | ChangeKind::Changed => {
                    if remote.kind == NodeKind::Directory {
                        self.emit(SyncAction::MkDirLocal {
                            path: path.to_string(),
                            sync_attribute: remote.sync_attribute.clone(),
                        });
                    } else {
                        let previous = if remote.change == ChangeKind::Created {
                            None
                        } else {
                            self.previous(path)?
                        };
                        self.emit(SyncAction::DownloadFile {
                            path: path.to_string(),
                            previous,
                            sync_attribute: remote.sync_attribute.clone(),
                        });
                    }
                }
                ChangeKind::Deleted => {
                    if local.kind == NodeKind::Directory && local.has_change(ChangeKind::Created)
                    {
                        self.emit(SyncAction::MkDirRemote {
                            path: path.to_string(),
                        });
                    } else {
                        let previous = self.previous(path)?;
                        self.emit(SyncAction::DeleteLocal {
                            path: path.to_string(),
                            previous,
                        });
                    }
                }
            },
            ChangeKind::Created => match remote.change {
                ChangeKind::Unknown => {
                    if local.kind == NodeKind::File {
                        self.emit_upload(path, None, local.modified)?;
                    } else if local.kind == NodeKind::Directory {
                        self.emit(SyncAction::MkDirRemote {
                            path: path.to_string(),
                        });
                    }
                }
                ChangeKind::Created => {
                    // Both sides created the path; remote wins. A type
                    // mismatch deletes the local version first.
                    if remote.kind == NodeKind::File {
                        if local.kind == NodeKind::Directory {
                            self.emit(SyncAction::DeleteLocal {
                                path: path.to_string(),
                                previous: None,
                            });
                        }
                        self.emit(SyncAction::DownloadFile {
                            path: path.to_string(),
                            previous: None,
                            sync_attribute: remote.sync_attribute.clone(),
                        });
                    } else if remote.kind == NodeKind::Directory {
                        if local.kind == NodeKind::File {
                            self.emit(SyncAction::DeleteLocal {
                                path: path.to_string(),
                                previous: None,
                            });
                        }
                        self.emit(SyncAction::MkDirLocal {
                            path: path.to_string(),
                            sync_attribute: remote.sync_attribute.clone(),
                        });
                    }
                }
                ChangeKind::Changed => self.impossible(path, "local created, remote changed"),
                ChangeKind::Deleted => self.impossible(path, "local created, remote deleted"),
            },
            ChangeKind::Changed => match remote.change {
                ChangeKind::Unknown => {
                    if local.kind == NodeKind::File {
                        let previous = self.previous(path)?;
                        self.emit_upload(path, previous, local.modified)?;
                    }
                }
                ChangeKind::Created => self.impossible(path, "local changed, remote created"),
                ChangeKind::Changed => {
                    if remote.kind == NodeKind::File {
                        let previous = self.previous(path)?;
                        self.emit(SyncAction::DownloadFile {
                            path: path.to_string(),
                            previous,
                            sync_attribute: remote.sync_attribute.clone(),
                        });
                    }
                }
                ChangeKind::Deleted => {
                    // Remote deleted and wins - unless the local folder
                    // holds new files, which are rescued by re-creating
                    // the remote folder.
                    if local.kind == NodeKind::Directory
                        && local.has_change(ChangeKind::Created)
                    {
                        self.emit(SyncAction::MkDirRemote {
                            path: path.to_string(),
                        });
                    } else {
                        let previous = self.previous(path)?;
                        self.emit(SyncAction::DeleteLocal {
                            path: path.to_string(),
                            previous,
                        });
                    }
                }
            },
            ChangeKind::Deleted => match remote.change {
                ChangeKind::Unknown => {
                    if remote.kind == NodeKind::Directory
                        && remote.has_change(ChangeKind::Created)
                    {
                        self.emit(SyncAction::MkDirLocal {
                            path: path.to_string(),
                            sync_attribute: remote.sync_attribute.clone(),
                        });
                    } else {
                        let previous = self.previous(path)?;
                        self.emit(SyncAction::DeleteRemote {
                            path: path.to_string(),
                            previous,
                        });
                    }
                }
                ChangeKind::Created => self.impossible(path, "local deleted, remote created"),
                ChangeKind::Changed => {
                    if remote.kind == NodeKind::Directory {
                        self.emit(SyncAction::MkDirLocal {
                            path: path.to_string(),
                            sync_attribute: remote.sync_attribute.clone(),
                        });
                    } else {
                        let previous = self.previous(path)?;
                        self.emit(SyncAction::DownloadFile {
                            path: path.to_string(),
                            previous,
                            sync_attribute: remote.sync_attribute.clone(),
                        });
                    }
                }
                ChangeKind::Deleted => {}
            },
        }
        Ok(())
    }
}

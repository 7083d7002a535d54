//! Action execution.
//!
//! Local actions run first, sequentially and synchronously. Remote actions
//! then run through a bounded pool: the scheduler repeatedly walks the
//! pending list and starts every action whose ordering constraints are
//! satisfied, re-entering whenever a job completes. Database commits
//! happen on the orchestration side only, after the owning job finished.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use futures::future::LocalBoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::{JobError, SyncError};
use crate::path::is_proper_prefix;
use crate::remote::{ListOptions, RemoteBackend};
use crate::state::{SyncStateDatabase, SyncStateEntry};
use crate::sync::actions::{PlannedAction, SyncAction};
use crate::sync::remote_tree::remote_path;
use crate::sync::writer::{atomic_write, delete_local_tree, file_mtime, to_local_path};
use crate::sync::{
    ConflictStrategy, Filter, LogCallback, LogEntryKind, StopState, SyncLogEntry,
};

/// Retries granted to a remote delete before it is given up on.
pub const DELETE_RETRY_LIMIT: u32 = 5;

/// Everything the executor needs from the synchronizer for one run.
pub struct ExecuteContext<'a> {
    pub backend: &'a dyn RemoteBackend,
    pub db: &'a mut dyn SyncStateDatabase,
    pub local_dir: &'a Path,
    pub remote_dir: &'a str,
    pub filter: &'a Filter,
    pub strategy: ConflictStrategy,
    pub max_jobs: usize,
    pub stop: &'a StopState,
    pub log: Option<&'a LogCallback>,
    pub progress: &'a watch::Sender<i32>,
    /// Remote folder sync-attributes captured during the run; written to
    /// the database at end-of-run on success.
    pub folder_attributes: &'a mut BTreeMap<String, String>,
    /// Denominator for progress reporting: all planned actions.
    pub total_actions: usize,
}

impl ExecuteContext<'_> {
    fn emit(&self, kind: LogEntryKind, message: &str) {
        if let Some(log) = self.log {
            log(&SyncLogEntry::new(kind, message));
        }
    }

    fn update_progress(&self, pending: usize) {
        if self.total_actions > 0 {
            let done = self.total_actions - pending.min(self.total_actions);
            let value = (done * 100 / self.total_actions) as i32;
            self.progress.send_replace(value);
        }
    }
}

/// Phase A: run `MkDirLocal` and `DeleteLocal` sequentially, committing to
/// the database immediately. Returns the remaining remote actions.
pub fn run_local_actions(
    ctx: &mut ExecuteContext<'_>,
    actions: Vec<PlannedAction>,
) -> Result<Vec<PlannedAction>, SyncError> {
    let mut remaining = Vec::with_capacity(actions.len());
    for planned in actions {
        match &planned.action {
            SyncAction::MkDirLocal {
                path,
                sync_attribute,
            } => {
                debug!(%path, "creating local folder");
                ctx.emit(LogEntryKind::LocalMkDir, path);
                let target = to_local_path(ctx.local_dir, path);
                std::fs::create_dir_all(&target).map_err(|source| {
                    SyncError::FailedCreatingLocalFolder {
                        path: path.clone(),
                        source,
                    }
                })?;
                // The entry itself is written at end-of-run, once the run
                // is known to be clean.
                ctx.folder_attributes
                    .insert(path.clone(), sync_attribute.clone());
            }
            SyncAction::DeleteLocal { path, .. } => {
                debug!(%path, "deleting local resource");
                ctx.emit(LogEntryKind::LocalDelete, path);
                delete_local_tree(ctx.local_dir, path, ctx.filter)?;
                ctx.db
                    .delete_subtree(path)
                    .map_err(SyncError::SyncStateDatabaseDeleteFailed)?;
            }
            _ => remaining.push(planned),
        }
    }
    Ok(remaining)
}

enum DeleteOutcome {
    Done,
    /// The remote folder still has children; retry once siblings settled.
    NonEmpty(String),
    /// Conditional delete lost against a concurrent update; retry.
    Mismatch,
    Failed(JobError),
}

enum Completed {
    Upload {
        path: String,
        modified: Option<chrono::DateTime<chrono::Utc>>,
        result: Result<crate::FileInfo, JobError>,
    },
    Download {
        path: String,
        previous: Option<SyncStateEntry>,
        fallback_attr: String,
        result: Result<(crate::FileInfo, Vec<u8>), JobError>,
    },
    DeleteRemote {
        planned: PlannedAction,
        outcome: DeleteOutcome,
    },
    MkDirRemote {
        path: String,
        result: Result<(), JobError>,
    },
}

fn can_run(
    planned: &PlannedAction,
    in_flight_paths: &HashSet<String>,
    pending_deletes: &HashSet<String>,
    pending_mkdirs: &HashSet<String>,
) -> bool {
    let path = planned.path();
    let is_delete = matches!(planned.action, SyncAction::DeleteRemote { .. });

    if in_flight_paths.contains(path) {
        return false;
    }
    // A delete past its retry budget never starts again; if nothing else
    // can run either, the scheduler reports the run as stuck.
    if is_delete && planned.retries >= DELETE_RETRY_LIMIT {
        return false;
    }
    // Deletes run leaves-first: anything above a pending delete waits.
    if pending_deletes
        .iter()
        .any(|q| is_proper_prefix(path, q))
    {
        return false;
    }
    // New content below a doomed path waits until the old resource is
    // gone; this also serializes delete-then-recreate on the same path.
    if !is_delete
        && pending_deletes
            .iter()
            .any(|q| q == path || is_proper_prefix(q, path))
    {
        return false;
    }
    // Parent folders are created before anything below them.
    if pending_mkdirs.iter().any(|q| is_proper_prefix(q, path)) {
        return false;
    }
    true
}

fn start_action<'a>(
    ctx: &ExecuteContext<'a>,
    planned: PlannedAction,
) -> Result<LocalBoxFuture<'a, Completed>, SyncError> {
    let backend = ctx.backend;
    let target = remote_path(ctx.remote_dir, planned.path());
    match planned.action.clone() {
        SyncAction::UploadFile {
            path,
            previous,
            modified,
        } => {
            debug!(%path, "uploading");
            ctx.emit(LogEntryKind::Upload, &path);
            let local_file = to_local_path(ctx.local_dir, &path);
            let data = std::fs::read(&local_file).map_err(|source| {
                SyncError::OpeningLocalFileFailed {
                    path: path.clone(),
                    source,
                }
            })?;
            // Under local-wins the write is unconditional; otherwise the
            // stored attribute guards against lost updates.
            let expected = match ctx.strategy {
                ConflictStrategy::LocalWins => None,
                ConflictStrategy::RemoteWins => previous
                    .as_ref()
                    .map(|e| e.sync_property().to_string())
                    .filter(|s| !s.is_empty()),
            };
            Ok(async move {
                let result = backend
                    .upload_file(&target, data, expected.as_deref())
                    .await;
                Completed::Upload {
                    path,
                    modified,
                    result,
                }
            }
            .boxed_local())
        }
        SyncAction::DownloadFile {
            path,
            previous,
            sync_attribute,
        } => {
            debug!(%path, "downloading");
            ctx.emit(LogEntryKind::Download, &path);
            Ok(async move {
                let result = backend.download_file(&target).await;
                Completed::Download {
                    path,
                    previous,
                    fallback_attr: sync_attribute,
                    result,
                }
            }
            .boxed_local())
        }
        SyncAction::DeleteRemote { path, .. } => {
            debug!(%path, retries = planned.retries, "deleting remote resource");
            ctx.emit(LogEntryKind::RemoteDelete, &path);
            Ok(async move {
                let outcome = delete_remote(backend, &target).await;
                Completed::DeleteRemote { planned, outcome }
            }
            .boxed_local())
        }
        SyncAction::MkDirRemote { path } => {
            debug!(%path, "creating remote folder");
            ctx.emit(LogEntryKind::RemoteMkDir, &path);
            Ok(async move {
                let result = backend.create_directory(&target).await;
                Completed::MkDirRemote { path, result }
            }
            .boxed_local())
        }
        SyncAction::MkDirLocal { .. } | SyncAction::DeleteLocal { .. } => {
            warn!("local action reached the remote execution phase");
            Err(SyncError::InvalidParameter(
                "local action in remote execution phase".into(),
            ))
        }
    }
}

/// The delete protocol: list first and refuse to delete a non-empty
/// folder (children deletes are scheduled separately and must have
/// completed), treat an already-absent resource as success, and report
/// conditional-delete races for retry.
async fn delete_remote(backend: &dyn RemoteBackend, target: &str) -> DeleteOutcome {
    let listing = match backend.list_files(target, ListOptions::default()).await {
        Ok(listing) => listing,
        Err(JobError::ResourceNotFound(_)) => return DeleteOutcome::Done,
        Err(JobError::RemoteResourceIsNotAFolder(_)) => {
            // Plain file; delete it directly.
            return match backend.delete(target, None).await {
                Ok(()) | Err(JobError::ResourceNotFound(_)) => DeleteOutcome::Done,
                Err(JobError::SyncAttributeMismatch(_)) => DeleteOutcome::Mismatch,
                Err(err) => DeleteOutcome::Failed(err),
            };
        }
        Err(err) => return DeleteOutcome::Failed(err),
    };
    if !listing.entries.is_empty() {
        let names: Vec<&str> = listing
            .entries
            .iter()
            .map(|e| e.info.name())
            .collect();
        return DeleteOutcome::NonEmpty(names.join(", "));
    }
    // The conditional sync-attribute check is omitted here: folder
    // attributes churn while sibling deletes land, and WebDAV servers
    // reject If-Match deletes on collections anyway.
    match backend.delete(target, None).await {
        Ok(()) | Err(JobError::ResourceNotFound(_)) => DeleteOutcome::Done,
        Err(JobError::SyncAttributeMismatch(_)) => DeleteOutcome::Mismatch,
        Err(err) => DeleteOutcome::Failed(err),
    }
}

/// Phase B: run the remote actions with bounded concurrency.
pub async fn run_remote_actions(
    ctx: &mut ExecuteContext<'_>,
    actions: Vec<PlannedAction>,
) -> Result<(), SyncError> {
    let mut pending = actions;
    let mut pending_deletes: HashSet<String> = pending
        .iter()
        .filter(|p| matches!(p.action, SyncAction::DeleteRemote { .. }))
        .map(|p| p.path().to_string())
        .collect();
    let mut pending_mkdirs: HashSet<String> = pending
        .iter()
        .filter(|p| matches!(p.action, SyncAction::MkDirRemote { .. }))
        .map(|p| p.path().to_string())
        .collect();

    let mut in_flight: FuturesUnordered<LocalBoxFuture<'_, Completed>> = FuturesUnordered::new();
    let mut in_flight_paths: HashSet<String> = HashSet::new();

    loop {
        if ctx.stop.is_stopped() {
            // Dropping the in-flight set aborts the jobs.
            return Err(SyncError::Stopped);
        }

        let mut started_any = false;
        let mut still_pending = Vec::with_capacity(pending.len());
        for planned in pending {
            if in_flight.len() >= ctx.max_jobs
                || !can_run(&planned, &in_flight_paths, &pending_deletes, &pending_mkdirs)
            {
                still_pending.push(planned);
                continue;
            }
            started_any = true;
            in_flight_paths.insert(planned.path().to_string());
            in_flight.push(start_action(ctx, planned)?);
        }
        pending = still_pending;

        ctx.update_progress(pending.len());

        if pending.is_empty() && in_flight.is_empty() {
            return Ok(());
        }
        if !started_any && in_flight.is_empty() {
            return Err(SyncError::Stuck);
        }

        let completed = tokio::select! {
            Some(completed) = in_flight.next() => completed,
            _ = ctx.stop.notified() => continue,
        };

        match completed {
            Completed::Upload {
                path,
                modified,
                result,
            } => {
                in_flight_paths.remove(&path);
                match result {
                    Ok(info) => {
                        ctx.db
                            .put(&SyncStateEntry::new(
                                &path,
                                modified,
                                info.sync_attribute(),
                            ))
                            .map_err(SyncError::SyncStateDatabaseWriteFailed)?;
                    }
                    Err(JobError::SyncAttributeMismatch(_)) => {
                        // Lost update: another client uploaded meanwhile.
                        // The remote version wins; the next run downloads.
                        debug!(%path, "upload skipped, remote version is newer");
                    }
                    Err(source) => {
                        return Err(SyncError::UploadFailed { path, source });
                    }
                }
            }
            Completed::Download {
                path,
                previous,
                fallback_attr,
                result,
            } => {
                in_flight_paths.remove(&path);
                let (info, data) = match result {
                    Ok(ok) => ok,
                    Err(source) => return Err(SyncError::DownloadFailed { path, source }),
                };
                let target = to_local_path(ctx.local_dir, &path);
                if ctx.strategy == ConflictStrategy::LocalWins {
                    // The local file may have changed while the download
                    // ran; under local-wins the newer local copy stays.
                    let previous_mtime = previous.as_ref().and_then(|e| e.modification_time());
                    if let (Some(current), Some(stored)) = (file_mtime(&target), previous_mtime)
                    {
                        if current > stored {
                            debug!(%path, "discarding download, local file is newer");
                            continue;
                        }
                    }
                }
                atomic_write(&target, &data).map_err(|source| {
                    SyncError::WritingLocalFileFailed {
                        path: path.clone(),
                        source,
                    }
                })?;
                let attr = if info.sync_attribute().is_empty() {
                    // Fall back to the attribute seen at list time; if it
                    // is already outdated the next run downloads again.
                    fallback_attr
                } else {
                    info.sync_attribute().to_string()
                };
                ctx.db
                    .put(&SyncStateEntry::new(&path, file_mtime(&target), attr))
                    .map_err(SyncError::SyncStateDatabaseWriteFailed)?;
            }
            Completed::DeleteRemote {
                mut planned,
                outcome,
            } => {
                let path = planned.path().to_string();
                in_flight_paths.remove(&path);
                match outcome {
                    DeleteOutcome::Done => {
                        ctx.db
                            .delete_subtree(&path)
                            .map_err(SyncError::SyncStateDatabaseDeleteFailed)?;
                        pending_deletes.remove(&path);
                    }
                    DeleteOutcome::NonEmpty(contents) => {
                        warn!(%path, %contents, "remote resource is not empty yet");
                        planned.retries += 1;
                        pending.push(planned);
                    }
                    DeleteOutcome::Mismatch => {
                        if planned.retries < DELETE_RETRY_LIMIT {
                            // Sibling deletions keep rolling the folder's
                            // attribute; try again.
                            planned.retries += 1;
                            pending.push(planned);
                        } else {
                            return Err(SyncError::FailedDeletingRemoteResource {
                                path,
                                message: format!(
                                    "still being updated after {} retries",
                                    planned.retries
                                ),
                            });
                        }
                    }
                    DeleteOutcome::Failed(err) => {
                        return Err(SyncError::FailedDeletingRemoteResource {
                            path,
                            message: err.to_string(),
                        });
                    }
                }
            }
            Completed::MkDirRemote { path, result } => {
                in_flight_paths.remove(&path);
                match result {
                    // An existing folder is exactly what we wanted.
                    Ok(()) | Err(JobError::FolderExists(_)) => {
                        pending_mkdirs.remove(&path);
                    }
                    Err(source) => {
                        return Err(SyncError::FailedCreatingRemoteFolder { path, source });
                    }
                }
            }
        }
    }
}

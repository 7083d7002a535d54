//! The synchronizer orchestrator.
//!
//! Drives one sync run end to end: validate inputs, open the sync-state
//! database, bootstrap the remote root on first sync, build both change
//! trees, merge them, execute the plan and finally commit the captured
//! folder attributes and close the database. The whole run happens on the
//! calling task; remote I/O is awaited, never blocked on.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::composite::{CompositeExecutor, ErrorMode};
use crate::error::{JobError, SyncError};
use crate::path::{make_path, segments};
use crate::remote::{ChangeDetectionMode, RemoteBackend};
use crate::state::{SyncStateDatabase, SyncStateEntry};
use crate::sync::execute::{run_local_actions, run_remote_actions, ExecuteContext};
use crate::sync::local_tree::build_local_change_tree;
use crate::sync::merge::merge_change_trees;
use crate::sync::remote_tree::build_remote_change_tree;
use crate::sync::{
    ConflictStrategy, Filter, LogCallback, LogEntryKind, StopHandle, StopState, SyncLogEntry,
    SynchronizerState,
};

/// Behavior switches of a [`Synchronizer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SynchronizerFlags {
    /// Create the remote root folder (and its parents) before the first
    /// sync against an empty sync-state database.
    pub create_remote_folder_on_first_sync: bool,
}

impl Default for SynchronizerFlags {
    fn default() -> Self {
        Self {
            create_remote_folder_on_first_sync: true,
        }
    }
}

/// Synchronizes a local directory with a remote one.
///
/// Construct with [`new`](Synchronizer::new), adjust via the `with_*`
/// builders, then [`run`](Synchronizer::run) once. A synchronizer is a
/// one-shot object: after the run finished (successfully or not) it stays
/// in the finished state.
pub struct Synchronizer {
    backend: Arc<dyn RemoteBackend>,
    database: Box<dyn SyncStateDatabase>,
    local_directory: PathBuf,
    remote_directory: String,
    filter: Box<Filter>,
    strategy: ConflictStrategy,
    max_jobs: usize,
    flags: SynchronizerFlags,
    state: SynchronizerState,
    stop: Arc<StopState>,
    progress_tx: watch::Sender<i32>,
    log: Option<Box<LogCallback>>,
    retry_with_fewer_jobs: bool,
}

impl Synchronizer {
    pub fn new(
        backend: Arc<dyn RemoteBackend>,
        database: Box<dyn SyncStateDatabase>,
        local_directory: impl Into<PathBuf>,
        remote_directory: impl AsRef<str>,
    ) -> Self {
        let (progress_tx, _) = watch::channel(-1);
        Self {
            backend,
            database,
            local_directory: local_directory.into(),
            remote_directory: make_path(remote_directory.as_ref()),
            filter: Box::new(|_, _| true),
            strategy: ConflictStrategy::default(),
            max_jobs: 12,
            flags: SynchronizerFlags::default(),
            state: SynchronizerState::Ready,
            stop: Arc::new(StopState::default()),
            progress_tx,
            log: None,
            retry_with_fewer_jobs: false,
        }
    }

    /// Exclude entries from the sync. See [`Filter`].
    pub fn with_filter(mut self, filter: impl Fn(&str, &crate::FileInfo) -> bool + 'static) -> Self {
        self.filter = Box::new(filter);
        self
    }

    pub fn with_conflict_strategy(mut self, strategy: ConflictStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Maximum number of concurrently running remote jobs. `1` forces
    /// fully sequential execution.
    pub fn with_max_jobs(mut self, max_jobs: usize) -> Self {
        self.max_jobs = max_jobs;
        self
    }

    pub fn with_flags(mut self, flags: SynchronizerFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Receive the run's log stream.
    pub fn with_log_callback(mut self, callback: impl Fn(&SyncLogEntry) + 'static) -> Self {
        self.log = Some(Box::new(callback));
        self
    }

    pub fn state(&self) -> SynchronizerState {
        self.state
    }

    /// Handle for stopping the run from elsewhere. Cheap to clone.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle::new(self.stop.clone())
    }

    /// Progress of the run in percent; `-1` until the plan exists.
    pub fn progress(&self) -> watch::Receiver<i32> {
        self.progress_tx.subscribe()
    }

    /// Whether the run failed in a way that suggests the server was
    /// overloaded by parallel requests; retrying with a smaller
    /// [`with_max_jobs`](Synchronizer::with_max_jobs) value may succeed.
    pub fn retry_with_fewer_jobs(&self) -> bool {
        self.retry_with_fewer_jobs
    }

    fn emit(&self, kind: LogEntryKind, message: &str) {
        if let Some(log) = &self.log {
            log(&SyncLogEntry::new(kind, message));
        }
    }

    /// Run the synchronization to completion.
    pub async fn run(&mut self) -> Result<(), SyncError> {
        if self.state != SynchronizerState::Ready {
            return Err(SyncError::InvalidParameter(
                "synchronizer has already run".into(),
            ));
        }
        self.state = SynchronizerState::Running;
        self.emit(LogEntryKind::Information, "Starting synchronization");

        let mut result = self.run_inner().await;

        // The database closes exactly once, before the run is reported as
        // finished; a close failure only surfaces if the run was clean.
        if self.database.is_open() {
            if let Err(close_err) = self.database.close() {
                warn!(error = %close_err, "failed to close sync state database");
                if result.is_ok() {
                    result = Err(SyncError::FailedClosingSyncStateDatabase(close_err));
                }
            }
        }

        if let Err(err) = &result {
            self.emit(LogEntryKind::Error, &err.to_string());
            if matches!(err.job_error(), Some(JobError::ServerClosedConnection))
                && self.max_jobs > 1
            {
                self.retry_with_fewer_jobs = true;
            }
        } else {
            self.progress_tx.send_replace(100);
        }
        self.state = SynchronizerState::Finished;
        self.emit(LogEntryKind::Information, "Finished synchronization");
        result
    }

    async fn run_inner(&mut self) -> Result<(), SyncError> {
        // The remote directory is canonicalized in the constructor and is
        // therefore never empty; the local one must exist up front.
        if !self.local_directory.is_dir() {
            return Err(SyncError::MissingParameter(
                "the local directory to be synced must exist".into(),
            ));
        }
        if self.max_jobs < 1 {
            return Err(SyncError::InvalidParameter(
                "the maximum number of jobs must be at least 1".into(),
            ));
        }

        self.database
            .open()
            .map_err(SyncError::FailedOpeningSyncStateDatabase)?;

        if self.stop.is_stopped() {
            return Err(SyncError::Stopped);
        }

        if self.flags.create_remote_folder_on_first_sync {
            let bootstrap_done = self
                .database
                .get("/")
                .map_err(|source| SyncError::SyncStateDatabaseLookupFailed {
                    path: "/".to_string(),
                    source,
                })?
                .is_some();
            if !bootstrap_done {
                self.create_remote_root().await?;
                // Remember the bootstrap so later runs skip it.
                self.database
                    .put(&SyncStateEntry::new("/", None, ""))
                    .map_err(SyncError::SyncStateDatabaseWriteFailed)?;
            }
        }

        self.emit(LogEntryKind::Information, "Creating sync plan");
        debug!("building local change tree");
        let local_tree =
            build_local_change_tree(self.database.as_ref(), &self.local_directory, &self.filter)?;

        if self.stop.is_stopped() {
            return Err(SyncError::Stopped);
        }

        debug!("building remote change tree");
        let remote_outcome = build_remote_change_tree(
            self.backend.as_ref(),
            self.database.as_ref(),
            &self.remote_directory,
            &self.filter,
            self.max_jobs,
            &self.stop,
        )
        .await?;

        let outcome = merge_change_trees(
            self.database.as_ref(),
            self.strategy,
            &local_tree,
            &remote_outcome.tree,
        )?;
        for warning in &outcome.warnings {
            self.emit(LogEntryKind::Warning, warning);
        }

        self.emit(LogEntryKind::Information, "Executing sync plan");
        let total_actions = outcome.actions.len();
        let mut folder_attributes: BTreeMap<String, String> = BTreeMap::new();

        let mut ctx = ExecuteContext {
            backend: self.backend.as_ref(),
            db: self.database.as_mut(),
            local_dir: &self.local_directory,
            remote_dir: &self.remote_directory,
            filter: &self.filter,
            strategy: self.strategy,
            max_jobs: self.max_jobs,
            stop: &self.stop,
            log: self.log.as_deref(),
            progress: &self.progress_tx,
            folder_attributes: &mut folder_attributes,
            total_actions,
        };

        debug!("running local sync actions");
        let remote_actions = run_local_actions(&mut ctx, outcome.actions)?;

        debug!("running remote sync actions");
        run_remote_actions(&mut ctx, remote_actions).await?;

        // Folder sync-attributes are only persisted after a clean run;
        // after failed transfers the stale attribute makes the next run
        // rescan the folder.
        if self.backend.change_detection_mode() == ChangeDetectionMode::RootStreamCursor {
            if let Some(cursor) = remote_outcome.cursor {
                folder_attributes.insert("/".to_string(), cursor);
            }
        }
        for (path, attribute) in folder_attributes {
            self.database
                .put(&SyncStateEntry::new(&path, None, attribute))
                .map_err(SyncError::SyncStateDatabaseWriteFailed)?;
        }

        Ok(())
    }

    /// Create the remote root folder one path component at a time,
    /// tolerating components that already exist.
    async fn create_remote_root(&mut self) -> Result<(), SyncError> {
        self.emit(LogEntryKind::Information, "Creating remote root folder");
        let mut executor = CompositeExecutor::<SyncError>::new(ErrorMode::StopOnFirstError);
        executor.set_max_jobs(1);

        let mut prefix = String::new();
        for part in segments(&self.remote_directory) {
            prefix = format!("{prefix}/{part}");
            let path = prefix.clone();
            let backend = self.backend.clone();
            debug!(%path, "creating remote folder");
            executor.add(async move {
                match backend.create_directory(&path).await {
                    Ok(()) | Err(JobError::FolderExists(_)) => Ok(()),
                    Err(source) => Err(SyncError::FailedCreatingRemoteFolder { path, source }),
                }
            });
        }
        executor.run().await
    }
}

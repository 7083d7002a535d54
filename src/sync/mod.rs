//! The bidirectional synchronization engine.
//!
//! A sync run is a pipeline: build a change tree per side
//! ([`local_tree`], [`remote_tree`]), merge the two into a list of actions
//! under a conflict strategy ([`merge`]), then execute the actions with
//! bounded concurrency ([`execute`]). [`engine::Synchronizer`] drives the
//! whole pipeline and owns the sync-state database for the run.

pub mod actions;
pub mod engine;
pub mod execute;
pub mod local_tree;
pub mod merge;
pub mod remote_tree;
pub mod writer;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

use crate::fileinfo::FileInfo;

pub use actions::{PlannedAction, SyncAction};
pub use engine::{Synchronizer, SynchronizerFlags};

/// Caller-supplied predicate deciding which entries take part in the sync.
///
/// Invoked with the canonical sync path and the entry's metadata, for
/// every local and every remote entry. Returning false excludes the entry
/// and, for directories, everything below it.
pub type Filter = dyn Fn(&str, &FileInfo) -> bool;

/// Callback receiving the run's log stream.
pub type LogCallback = dyn Fn(&SyncLogEntry);

/// Which side wins when both sides changed the same path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConflictStrategy {
    /// The remote version wins; local modifications are overwritten.
    #[default]
    RemoteWins,
    /// The local version wins; uploads skip the conditional-write check.
    LocalWins,
}

/// Lifecycle of a [`Synchronizer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynchronizerState {
    Ready,
    Running,
    Finished,
}

/// Classification of a [`SyncLogEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogEntryKind {
    Information,
    Warning,
    Error,
    LocalMkDir,
    RemoteMkDir,
    LocalDelete,
    RemoteDelete,
    Download,
    Upload,
}

/// One entry of the run's log stream. Action kinds carry the affected
/// path in `message`; the informational kinds carry free text.
#[derive(Debug, Clone)]
pub struct SyncLogEntry {
    pub kind: LogEntryKind,
    pub message: String,
}

impl SyncLogEntry {
    pub fn new(kind: LogEntryKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct StopState {
    stopped: AtomicBool,
    notify: Notify,
}

impl StopState {
    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub(crate) async fn notified(&self) {
        self.notify.notified().await;
    }
}

/// Handle for stopping a running synchronization.
///
/// Stopping is idempotent: no new jobs start, in-flight jobs are aborted,
/// and the run finishes with [`SyncError::Stopped`](crate::SyncError).
#[derive(Clone)]
pub struct StopHandle {
    state: Arc<StopState>,
}

impl StopHandle {
    pub(crate) fn new(state: Arc<StopState>) -> Self {
        Self { state }
    }

    pub fn stop(&self) {
        self.state.stopped.store(true, Ordering::SeqCst);
        self.state.notify.notify_waiters();
    }
}

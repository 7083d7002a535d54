//! The executable units a merge produces.

use chrono::{DateTime, Utc};

use crate::state::SyncStateEntry;

/// A single atomic step of a sync plan.
///
/// `previous` is the sync-state entry recorded for the path at the last
/// run, where one existed; conditional remote writes derive their expected
/// sync-attribute from it.
#[derive(Debug, Clone)]
pub enum SyncAction {
    /// Replace the remote file with the local one.
    UploadFile {
        path: String,
        previous: Option<SyncStateEntry>,
        /// Local mtime captured at plan time; committed to the sync-state
        /// database when the upload succeeds.
        modified: Option<DateTime<Utc>>,
    },
    /// Replace the local file with the remote one.
    DownloadFile {
        path: String,
        previous: Option<SyncStateEntry>,
        /// Sync-attribute seen by the listing; fallback if the download
        /// response carries none.
        sync_attribute: String,
    },
    /// Remove the local file or directory (recursively, filtered).
    DeleteLocal {
        path: String,
        previous: Option<SyncStateEntry>,
    },
    /// Remove the remote file or (empty) directory.
    DeleteRemote {
        path: String,
        previous: Option<SyncStateEntry>,
    },
    /// Ensure the local directory exists, capturing the remote folder's
    /// sync-attribute for the end-of-run commit.
    MkDirLocal { path: String, sync_attribute: String },
    /// Create the remote directory.
    MkDirRemote { path: String },
}

impl SyncAction {
    /// The canonical path the action operates on.
    pub fn path(&self) -> &str {
        match self {
            SyncAction::UploadFile { path, .. }
            | SyncAction::DownloadFile { path, .. }
            | SyncAction::DeleteLocal { path, .. }
            | SyncAction::DeleteRemote { path, .. }
            | SyncAction::MkDirLocal { path, .. }
            | SyncAction::MkDirRemote { path } => path,
        }
    }

    /// Whether the action runs purely against the local side.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            SyncAction::MkDirLocal { .. } | SyncAction::DeleteLocal { .. }
        )
    }

    /// Short tag for log lines.
    pub fn verb(&self) -> &'static str {
        match self {
            SyncAction::UploadFile { .. } => "upload",
            SyncAction::DownloadFile { .. } => "download",
            SyncAction::DeleteLocal { .. } => "delete-local",
            SyncAction::DeleteRemote { .. } => "delete-remote",
            SyncAction::MkDirLocal { .. } => "mkdir-local",
            SyncAction::MkDirRemote { .. } => "mkdir-remote",
        }
    }
}

/// A planned action plus its retry budget bookkeeping.
#[derive(Debug, Clone)]
pub struct PlannedAction {
    pub action: SyncAction,
    pub retries: u32,
}

impl PlannedAction {
    pub fn new(action: SyncAction) -> Self {
        Self { action, retries: 0 }
    }

    pub fn path(&self) -> &str {
        self.action.path()
    }
}

//! Error types for tidemark.
//!
//! Two taxonomies exist side by side: [`JobError`] is reported by a single
//! remote operation, [`SyncError`] is the terminal state of a whole sync
//! run. The sync-state database has its own small [`StateError`] which the
//! synchronizer maps onto `SyncError` variants.

use thiserror::Error;

/// Error reported by a single remote backend operation.
///
/// Backends should map their wire-level failures onto these variants; the
/// executor only ever distinguishes the kinds listed here.
#[derive(Error, Debug)]
pub enum JobError {
    /// The job was aborted by a user-requested stop.
    #[error("job stopped by user")]
    Stopped,

    /// A parameter required to run the job is missing.
    #[error("missing parameter: {0}")]
    MissingParameter(String),

    /// A parameter has an invalid value.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The server replied with something the backend could not interpret.
    #[error("invalid response from server: {0}")]
    InvalidResponse(String),

    /// A network request failed (transport error, timeout, HTTP 5xx, ...).
    #[error("network request failed: {0}")]
    NetworkRequestFailed(String),

    /// The server rejected the request for authorization reasons.
    #[error("request forbidden: {0}")]
    Forbidden(String),

    /// The addressed remote resource does not exist.
    #[error("remote resource not found: {0}")]
    ResourceNotFound(String),

    /// The server reported a content conflict.
    #[error("server content conflict: {0}")]
    ServerContentConflict(String),

    /// A conditional write or delete failed because the resource changed
    /// remotely since it was last seen (lost update).
    #[error("sync attribute mismatch on {0}")]
    SyncAttributeMismatch(String),

    /// A directory to be created already exists.
    #[error("remote folder already exists: {0}")]
    FolderExists(String),

    /// The server closed the connection mid-request. When this shows up
    /// with a parallel job pool, the server is likely overloaded.
    #[error("server closed the connection")]
    ServerClosedConnection,

    /// The resource was reported as deleted by the server.
    #[error("remote resource deleted: {0}")]
    ResourceDeleted(String),

    /// A listing was requested on something that is not a folder.
    #[error("remote resource is not a folder: {0}")]
    RemoteResourceIsNotAFolder(String),
}

/// Error of the sync-state database storage layer.
#[derive(Error, Debug)]
pub enum StateError {
    /// IO error of the backing file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// SQL-level error of the relational store.
    #[error("SQL error: {0}")]
    Sql(#[from] rusqlite::Error),

    /// The on-disk document is malformed or has an unsupported version.
    #[error("invalid sync state database: {0}")]
    Format(String),

    /// The database is used while closed, or opened twice.
    #[error("sync state database is {0}")]
    Usage(&'static str),
}

/// Terminal error of a whole synchronization run.
///
/// The first error encountered latches; later errors are logged but do not
/// replace it.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The run was stopped programmatically.
    #[error("synchronization stopped")]
    Stopped,

    /// A required input of the synchronizer is missing.
    #[error("missing parameter: {0}")]
    MissingParameter(String),

    /// An input of the synchronizer has an invalid value.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Opening the sync-state database failed.
    #[error("failed opening sync state database: {0}")]
    FailedOpeningSyncStateDatabase(StateError),

    /// Closing the sync-state database failed.
    #[error("failed closing sync state database: {0}")]
    FailedClosingSyncStateDatabase(StateError),

    /// Creating a remote folder failed.
    #[error("failed creating remote folder {path}: {source}")]
    FailedCreatingRemoteFolder { path: String, source: JobError },

    /// Creating a local folder failed.
    #[error("failed creating local folder {path}: {source}")]
    FailedCreatingLocalFolder {
        path: String,
        source: std::io::Error,
    },

    /// A lookup in the sync-state database failed.
    #[error("sync state database lookup failed for {path}: {source}")]
    SyncStateDatabaseLookupFailed { path: String, source: StateError },

    /// A write to the sync-state database failed.
    #[error("sync state database write failed: {0}")]
    SyncStateDatabaseWriteFailed(StateError),

    /// A delete in the sync-state database failed.
    #[error("sync state database delete failed: {0}")]
    SyncStateDatabaseDeleteFailed(StateError),

    /// Listing a remote folder failed.
    #[error("failed listing remote folder {path}: {source}")]
    FailedListingRemoteFolder { path: String, source: JobError },

    /// Deleting a local file or folder failed.
    #[error("failed deleting local resource {path}: {message}")]
    FailedDeletingLocal { path: String, message: String },

    /// Deleting a remote resource failed.
    #[error("failed deleting remote resource {path}: {message}")]
    FailedDeletingRemoteResource { path: String, message: String },

    /// An upload failed.
    #[error("uploading {path} failed: {source}")]
    UploadFailed { path: String, source: JobError },

    /// A download failed.
    #[error("downloading {path} failed: {source}")]
    DownloadFailed { path: String, source: JobError },

    /// Committing downloaded data to the local file failed.
    #[error("writing to local file {path} failed: {source}")]
    WritingLocalFileFailed {
        path: String,
        source: std::io::Error,
    },

    /// Opening a local file for reading or writing failed.
    #[error("opening local file {path} failed: {source}")]
    OpeningLocalFileFailed {
        path: String,
        source: std::io::Error,
    },

    /// No pending action can start and nothing is in flight: the plan
    /// cannot make progress.
    #[error("cannot continue sync - it is stuck")]
    Stuck,
}

impl SyncError {
    /// The job error underlying this sync error, if any.
    pub fn job_error(&self) -> Option<&JobError> {
        match self {
            SyncError::FailedCreatingRemoteFolder { source, .. }
            | SyncError::FailedListingRemoteFolder { source, .. }
            | SyncError::UploadFailed { source, .. }
            | SyncError::DownloadFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}

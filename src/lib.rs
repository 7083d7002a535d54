//! Tidemark - bidirectional directory synchronization engine
//!
//! Tidemark keeps a local directory and a remote one (WebDAV-compatible
//! servers, Dropbox-style APIs) in sync through discrete runs: it detects
//! changes on both sides against a persistent sync-state database, merges
//! the two change trees under a conflict strategy, and executes the
//! resulting action plan against the backend with bounded concurrency.
//!
//! Backends plug in through the [`RemoteBackend`] trait; the sync state
//! persists through either [`SqliteSyncStateDatabase`] or
//! [`JsonSyncStateDatabase`].

pub mod composite;
pub mod error;
pub mod fileinfo;
pub mod path;
pub mod remote;
pub mod state;
pub mod sync;
pub mod tree;

// Re-exports for convenience
pub use composite::{CompositeExecutor, CompositeHandle, ErrorMode};
pub use error::{JobError, StateError, SyncError};
pub use fileinfo::{FileInfo, FileKind};
pub use remote::{
    ChangeDetectionMode, ListFilesResult, ListOptions, ListedEntry, RemoteBackend,
};
pub use state::{
    JsonSyncStateDatabase, SqliteSyncStateDatabase, SyncStateDatabase, SyncStateEntry,
};
pub use sync::{
    ConflictStrategy, LogEntryKind, StopHandle, SyncAction, SyncLogEntry, Synchronizer,
    SynchronizerFlags, SynchronizerState,
};
pub use tree::{ChangeKind, ChangeNode, ChangeTree, NodeKind};

//! The remote backend contract.
//!
//! A backend exposes the six one-shot operations the executor needs; each
//! method call is one job that completes exactly once with a result or a
//! categorized [`JobError`]. Concrete wire protocols (WebDAV XML, Dropbox
//! JSON, OAuth) live outside this crate; implementations only have to
//! satisfy this trait.

pub mod retry;

use async_trait::async_trait;

use crate::error::JobError;
use crate::fileinfo::FileInfo;

/// How a backend reports remote changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeDetectionMode {
    /// Every folder carries a sync-attribute covering its subtree; the
    /// engine prunes unchanged subtrees at list time (WebDAV-style ETags).
    FolderSyncAttributes,
    /// One recursive listing at the root yields all changes since a stored
    /// cursor (Dropbox-style delta streams).
    RootStreamCursor,
}

/// Result of a [`RemoteBackend::list_files`] call.
#[derive(Debug, Clone, Default)]
pub struct ListFilesResult {
    /// Metadata of the listed folder itself.
    pub folder: FileInfo,
    /// The folder's children - or, for a recursive cursor listing, every
    /// changed entry below the root. Entries of a cursor listing carry
    /// their path relative to the listed root in [`ListedEntry::path`].
    pub entries: Vec<ListedEntry>,
    /// Cursor to present on the next listing (cursor mode only).
    pub cursor: Option<String>,
}

/// One entry of a listing.
#[derive(Debug, Clone)]
pub struct ListedEntry {
    /// Canonical path relative to the listed folder. For a flat listing
    /// this is just `/<name>`.
    pub path: String,
    /// The entry's metadata. Cursor-mode backends report removed entries
    /// with [`FileKind::Deleted`](crate::FileKind::Deleted).
    pub info: FileInfo,
}

/// Parameters of a listing.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Request a recursive listing (cursor mode).
    pub recursive: bool,
    /// Cursor from a previous listing; `None` asks for everything.
    pub cursor: Option<String>,
}

/// The minimal operation set the sync engine requires of a backend.
///
/// All operations address canonical sync paths below the backend's
/// configured remote root. Payloads are whole-file byte buffers; the engine
/// performs no delta transfers.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// The backend's change-detection mode.
    fn change_detection_mode(&self) -> ChangeDetectionMode;

    /// Whether the folder-mode tree builder must descend into folders even
    /// when their sync-attribute is unchanged. Needed for servers whose
    /// folder attributes do not reflect sub-tree changes.
    fn always_check_subfolders(&self) -> bool {
        false
    }

    /// Create the directory at `path`. The parent must exist. Fails with
    /// [`JobError::FolderExists`] if the directory is already there.
    async fn create_directory(&self, path: &str) -> Result<(), JobError>;

    /// Delete the file or (empty) directory at `path`. When
    /// `expected_sync_attr` is given, the backend must reject the delete
    /// with [`JobError::SyncAttributeMismatch`] if the resource changed.
    async fn delete(&self, path: &str, expected_sync_attr: Option<&str>) -> Result<(), JobError>;

    /// Fetch metadata of a single file or directory.
    async fn get_file_info(&self, path: &str) -> Result<FileInfo, JobError>;

    /// List a folder, or - with [`ListOptions::recursive`] - stream changes
    /// below it.
    async fn list_files(&self, path: &str, options: ListOptions)
        -> Result<ListFilesResult, JobError>;

    /// Download the file at `path`. Returns its metadata (for the
    /// sync-attribute) together with the content.
    async fn download_file(&self, path: &str) -> Result<(FileInfo, Vec<u8>), JobError>;

    /// Upload `data` as the file at `path`, replacing any previous
    /// content. When `expected_sync_attr` is given, the backend must
    /// reject the write with [`JobError::SyncAttributeMismatch`] if the
    /// remote version changed (lost-update protection). Returns the new
    /// metadata; backends that cannot report a fresh sync-attribute leave
    /// it empty.
    async fn upload_file(
        &self,
        path: &str,
        data: Vec<u8>,
        expected_sync_attr: Option<&str>,
    ) -> Result<FileInfo, JobError>;
}

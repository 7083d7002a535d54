//! In-memory remote backend for integration tests.
//!
//! Behaves like a small cloud store: entries carry revision-based sync
//! attributes, folder attributes cover their subtree (configurable), and
//! a cursor listing streams every change since a revision. Failure modes
//! needed by the scenarios can be injected.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tidemark::{
    ChangeDetectionMode, FileInfo, FileKind, JobError, ListFilesResult, ListOptions, ListedEntry,
    RemoteBackend,
};

#[derive(Debug, Clone)]
enum Entry {
    File { data: Vec<u8>, rev: u64 },
    Dir { rev: u64 },
}

#[derive(Debug, Default)]
struct Inner {
    entries: BTreeMap<String, Entry>,
    tombstones: BTreeMap<String, u64>,
    next_rev: u64,
    ops: Vec<String>,
    phantom_children: HashSet<String>,
    fail_uploads_with_closed_connection: bool,
}

/// Shared, clonable in-memory backend.
#[derive(Clone)]
pub struct MockRemote {
    inner: Arc<Mutex<Inner>>,
    mode: ChangeDetectionMode,
    recursive_folder_attrs: bool,
    always_check: bool,
    delay: Option<Duration>,
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or("")
}

fn is_proper_prefix(prefix: &str, path: &str) -> bool {
    if prefix == "/" {
        return path != "/";
    }
    path.len() > prefix.len()
        && path.starts_with(prefix)
        && path.as_bytes()[prefix.len()] == b'/'
}

impl MockRemote {
    pub fn new(mode: ChangeDetectionMode) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                next_rev: 1,
                ..Inner::default()
            })),
            mode,
            recursive_folder_attrs: true,
            always_check: false,
            delay: None,
        }
    }

    pub fn folder_mode() -> Self {
        Self::new(ChangeDetectionMode::FolderSyncAttributes)
    }

    pub fn cursor_mode() -> Self {
        Self::new(ChangeDetectionMode::RootStreamCursor)
    }

    /// Emulate a server whose folder attributes only cover direct
    /// children; the engine must then always descend.
    pub fn with_non_recursive_folder_attrs(mut self) -> Self {
        self.recursive_folder_attrs = false;
        self.always_check = true;
        self
    }

    /// Delay every operation, for stop/cancellation tests.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    /// Pretend `path` always holds a child, so deletes keep failing.
    pub fn add_phantom_child(&self, path: &str) {
        self.lock().phantom_children.insert(path.to_string());
    }

    pub fn fail_uploads_with_closed_connection(&self) {
        self.lock().fail_uploads_with_closed_connection = true;
    }

    /// Create a directory directly in the store (test seeding).
    pub fn seed_dir(&self, path: &str) {
        let mut inner = self.lock();
        let rev = inner.next_rev;
        inner.next_rev += 1;
        inner.entries.insert(path.to_string(), Entry::Dir { rev });
    }

    /// Create or replace a file directly in the store (test seeding).
    pub fn seed_file(&self, path: &str, data: &[u8]) {
        let mut inner = self.lock();
        let rev = inner.next_rev;
        inner.next_rev += 1;
        inner.entries.insert(
            path.to_string(),
            Entry::File {
                data: data.to_vec(),
                rev,
            },
        );
    }

    /// Remove an entry directly in the store, leaving a tombstone.
    pub fn seed_delete(&self, path: &str) {
        let mut inner = self.lock();
        let rev = inner.next_rev;
        inner.next_rev += 1;
        inner.entries.remove(path);
        let descendants: Vec<String> = inner
            .entries
            .keys()
            .filter(|p| is_proper_prefix(path, p))
            .cloned()
            .collect();
        for p in descendants {
            inner.entries.remove(&p);
            inner.tombstones.insert(p, rev);
        }
        inner.tombstones.insert(path.to_string(), rev);
    }

    pub fn file_content(&self, path: &str) -> Option<Vec<u8>> {
        match self.lock().entries.get(path) {
            Some(Entry::File { data, .. }) => Some(data.clone()),
            _ => None,
        }
    }

    pub fn has_dir(&self, path: &str) -> bool {
        matches!(self.lock().entries.get(path), Some(Entry::Dir { .. }))
    }

    pub fn has_entry(&self, path: &str) -> bool {
        self.lock().entries.contains_key(path)
    }

    /// All operations performed, in order (e.g. `"upload /remote/a.txt"`).
    pub fn ops(&self) -> Vec<String> {
        self.lock().ops.clone()
    }

    pub fn op_count(&self, verb: &str) -> usize {
        self.lock()
            .ops
            .iter()
            .filter(|op| op.starts_with(verb))
            .count()
    }

    fn attr_of(inner: &Inner, path: &str, entry: &Entry, recursive: bool) -> String {
        match entry {
            Entry::File { rev, .. } => format!("r{rev}"),
            Entry::Dir { rev } => Self::dir_attr(inner, path, *rev, recursive),
        }
    }

    /// A folder attribute derived from the revisions below the folder; it
    /// changes whenever the (direct or full) subtree changes.
    fn dir_attr(inner: &Inner, path: &str, own_rev: u64, recursive: bool) -> String {
        let mut parts = vec![format!("@{own_rev}")];
        for (child, entry) in &inner.entries {
            let include = if recursive {
                is_proper_prefix(path, child)
            } else {
                is_proper_prefix(path, child) && !child[path.len()..].trim_start_matches('/').contains('/')
            };
            if include {
                let rev = match entry {
                    Entry::File { rev, .. } | Entry::Dir { rev } => rev,
                };
                parts.push(format!("{}:{rev}", basename(child)));
            }
        }
        format!("d[{}]", parts.join("|"))
    }

    fn info_for(inner: &Inner, path: &str, entry: &Entry, recursive_attrs: bool) -> FileInfo {
        match entry {
            Entry::File { .. } => FileInfo::file(
                basename(path),
                Self::attr_of(inner, path, entry, recursive_attrs),
            ),
            Entry::Dir { .. } => FileInfo::directory(
                basename(path),
                Self::attr_of(inner, path, entry, recursive_attrs),
            ),
        }
    }

    async fn simulate_latency(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn parent_exists(inner: &Inner, path: &str) -> bool {
        match path.rsplit_once('/') {
            None | Some(("", _)) => true,
            Some((parent, _)) => matches!(inner.entries.get(parent), Some(Entry::Dir { .. })),
        }
    }
}

#[async_trait]
impl RemoteBackend for MockRemote {
    fn change_detection_mode(&self) -> ChangeDetectionMode {
        self.mode
    }

    fn always_check_subfolders(&self) -> bool {
        self.always_check
    }

    async fn create_directory(&self, path: &str) -> Result<(), JobError> {
        self.simulate_latency().await;
        let mut inner = self.lock();
        inner.ops.push(format!("mkdir {path}"));
        if inner.entries.contains_key(path) {
            return Err(JobError::FolderExists(path.to_string()));
        }
        if !Self::parent_exists(&inner, path) {
            return Err(JobError::NetworkRequestFailed(format!(
                "parent of {path} does not exist"
            )));
        }
        let rev = inner.next_rev;
        inner.next_rev += 1;
        inner.entries.insert(path.to_string(), Entry::Dir { rev });
        Ok(())
    }

    async fn delete(&self, path: &str, expected_sync_attr: Option<&str>) -> Result<(), JobError> {
        self.simulate_latency().await;
        let mut inner = self.lock();
        inner.ops.push(format!("delete {path}"));
        let Some(entry) = inner.entries.get(path).cloned() else {
            return Err(JobError::ResourceNotFound(path.to_string()));
        };
        if let Some(expected) = expected_sync_attr {
            let current = Self::attr_of(&inner, path, &entry, self.recursive_folder_attrs);
            if current != expected {
                return Err(JobError::SyncAttributeMismatch(path.to_string()));
            }
        }
        let rev = inner.next_rev;
        inner.next_rev += 1;
        let doomed: Vec<String> = inner
            .entries
            .keys()
            .filter(|p| p.as_str() == path || is_proper_prefix(path, p))
            .cloned()
            .collect();
        for p in doomed {
            inner.entries.remove(&p);
            inner.tombstones.insert(p, rev);
        }
        Ok(())
    }

    async fn get_file_info(&self, path: &str) -> Result<FileInfo, JobError> {
        self.simulate_latency().await;
        let inner = self.lock();
        match inner.entries.get(path) {
            Some(entry) => Ok(Self::info_for(
                &inner,
                path,
                entry,
                self.recursive_folder_attrs,
            )),
            None => Err(JobError::ResourceNotFound(path.to_string())),
        }
    }

    async fn list_files(
        &self,
        path: &str,
        options: ListOptions,
    ) -> Result<ListFilesResult, JobError> {
        self.simulate_latency().await;
        let mut inner = self.lock();
        inner.ops.push(format!("list {path}"));

        if options.recursive {
            let since: u64 = options
                .cursor
                .as_deref()
                .and_then(|c| c.parse().ok())
                .unwrap_or(0);
            let mut entries = Vec::new();
            for (child, entry) in &inner.entries {
                if !is_proper_prefix(path, child) {
                    continue;
                }
                let rev = match entry {
                    Entry::File { rev, .. } | Entry::Dir { rev } => *rev,
                };
                if rev > since {
                    let relative = if path == "/" {
                        child.clone()
                    } else {
                        child[path.len()..].to_string()
                    };
                    entries.push(ListedEntry {
                        path: relative,
                        info: Self::info_for(&inner, child, entry, true),
                    });
                }
            }
            for (child, rev) in &inner.tombstones {
                if is_proper_prefix(path, child) && *rev > since {
                    let mut info = FileInfo::default();
                    info.set_kind(FileKind::Deleted);
                    info.set_name(basename(child));
                    let relative = if path == "/" {
                        child.clone()
                    } else {
                        child[path.len()..].to_string()
                    };
                    entries.push(ListedEntry {
                        path: relative,
                        info,
                    });
                }
            }
            return Ok(ListFilesResult {
                folder: FileInfo::directory(basename(path), ""),
                entries,
                cursor: Some(format!("{}", inner.next_rev - 1)),
            });
        }

        let folder = match inner.entries.get(path) {
            Some(entry @ Entry::Dir { .. }) => {
                Self::info_for(&inner, path, entry, self.recursive_folder_attrs)
            }
            Some(Entry::File { .. }) => {
                return Err(JobError::RemoteResourceIsNotAFolder(path.to_string()))
            }
            None if path == "/" => FileInfo::directory("", ""),
            None => return Err(JobError::ResourceNotFound(path.to_string())),
        };
        let mut entries = Vec::new();
        for (child, entry) in &inner.entries {
            let direct = is_proper_prefix(path, child)
                && !child[path.len()..].trim_start_matches('/').contains('/');
            if direct {
                entries.push(ListedEntry {
                    path: format!("/{}", basename(child)),
                    info: Self::info_for(&inner, child, entry, self.recursive_folder_attrs),
                });
            }
        }
        if inner.phantom_children.contains(path) {
            entries.push(ListedEntry {
                path: "/ghost".to_string(),
                info: FileInfo::file("ghost", "r0"),
            });
        }
        Ok(ListFilesResult {
            folder,
            entries,
            cursor: None,
        })
    }

    async fn download_file(&self, path: &str) -> Result<(FileInfo, Vec<u8>), JobError> {
        self.simulate_latency().await;
        let mut inner = self.lock();
        inner.ops.push(format!("download {path}"));
        match inner.entries.get(path) {
            Some(entry @ Entry::File { data, .. }) => Ok((
                Self::info_for(&inner, path, entry, self.recursive_folder_attrs),
                data.clone(),
            )),
            Some(Entry::Dir { .. }) => Err(JobError::NetworkRequestFailed(format!(
                "{path} is a folder"
            ))),
            None => Err(JobError::ResourceNotFound(path.to_string())),
        }
    }

    async fn upload_file(
        &self,
        path: &str,
        data: Vec<u8>,
        expected_sync_attr: Option<&str>,
    ) -> Result<FileInfo, JobError> {
        self.simulate_latency().await;
        let mut inner = self.lock();
        inner
            .ops
            .push(format!("upload {path} cond={expected_sync_attr:?}"));
        if inner.fail_uploads_with_closed_connection {
            return Err(JobError::ServerClosedConnection);
        }
        if !Self::parent_exists(&inner, path) {
            return Err(JobError::NetworkRequestFailed(format!(
                "parent of {path} does not exist"
            )));
        }
        if let Some(expected) = expected_sync_attr {
            match inner.entries.get(path) {
                Some(entry @ Entry::File { .. }) => {
                    let current =
                        Self::attr_of(&inner, path, entry, self.recursive_folder_attrs);
                    if current != expected {
                        return Err(JobError::SyncAttributeMismatch(path.to_string()));
                    }
                }
                _ => return Err(JobError::SyncAttributeMismatch(path.to_string())),
            }
        }
        let rev = inner.next_rev;
        inner.next_rev += 1;
        inner
            .entries
            .insert(path.to_string(), Entry::File { data, rev });
        Ok(FileInfo::file(basename(path), format!("r{rev}")))
    }
}

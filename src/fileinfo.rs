//! Remote entry metadata.

use std::collections::BTreeMap;
use std::path::Path;

/// The kind of a remote (or local) entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// The entry could not be classified.
    Invalid,
    /// A regular file.
    File,
    /// A directory.
    Directory,
    /// An entry reported as deleted by a change stream.
    Deleted,
}

/// Metadata of a single remote entry, as reported by a backend.
///
/// The `sync_attribute` is an opaque string that changes whenever the
/// entry's content (or, for a directory, its subtree) changes - a WebDAV
/// ETag, a Dropbox rev, or similar. Backends that cannot supply one leave
/// it empty; the engine then treats the entry as always-changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileInfo {
    kind: Option<FileKind>,
    name: String,
    sync_attribute: String,
    url: Option<String>,
    custom_properties: BTreeMap<String, String>,
}

impl FileInfo {
    /// Build metadata for a local filesystem entry. Used to feed the filter
    /// callback during local tree building and deletion.
    pub fn from_local_file(path: &Path) -> Self {
        let kind = match std::fs::symlink_metadata(path) {
            Ok(meta) if meta.is_dir() => FileKind::Directory,
            Ok(meta) if meta.is_file() => FileKind::File,
            _ => FileKind::Invalid,
        };
        Self {
            kind: Some(kind),
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            ..Self::default()
        }
    }

    pub fn is_valid(&self) -> bool {
        self.kind.is_some()
    }

    pub fn kind(&self) -> FileKind {
        self.kind.unwrap_or(FileKind::Invalid)
    }

    pub fn set_kind(&mut self, kind: FileKind) {
        self.kind = Some(kind);
    }

    pub fn is_file(&self) -> bool {
        self.kind() == FileKind::File
    }

    pub fn is_directory(&self) -> bool {
        self.kind() == FileKind::Directory
    }

    pub fn is_deleted(&self) -> bool {
        self.kind() == FileKind::Deleted
    }

    /// The entry's basename.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// The backend's change-tracking attribute; empty if not supplied.
    pub fn sync_attribute(&self) -> &str {
        &self.sync_attribute
    }

    pub fn set_sync_attribute(&mut self, attribute: impl Into<String>) {
        self.sync_attribute = attribute.into();
    }

    /// Optional URL under which the entry is reachable.
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn set_url(&mut self, url: impl Into<String>) {
        self.url = Some(url.into());
    }

    /// Backend-specific extra properties, keyed by backend-defined names.
    pub fn custom_property(&self, key: &str) -> Option<&str> {
        self.custom_properties.get(key).map(String::as_str)
    }

    pub fn set_custom_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.custom_properties.insert(key.into(), value.into());
    }

    /// Shorthand for constructing a file entry in backends and tests.
    pub fn file(name: impl Into<String>, sync_attribute: impl Into<String>) -> Self {
        Self {
            kind: Some(FileKind::File),
            name: name.into(),
            sync_attribute: sync_attribute.into(),
            ..Self::default()
        }
    }

    /// Shorthand for constructing a directory entry.
    pub fn directory(name: impl Into<String>, sync_attribute: impl Into<String>) -> Self {
        Self {
            kind: Some(FileKind::Directory),
            name: name.into(),
            sync_attribute: sync_attribute.into(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_file_info_is_invalid() {
        let info = FileInfo::default();
        assert!(!info.is_valid());
        assert_eq!(info.kind(), FileKind::Invalid);
    }

    #[test]
    fn constructors_set_kind_and_attribute() {
        let f = FileInfo::file("a.txt", "etag-1");
        assert!(f.is_file());
        assert_eq!(f.name(), "a.txt");
        assert_eq!(f.sync_attribute(), "etag-1");

        let d = FileInfo::directory("docs", "");
        assert!(d.is_directory());
        assert!(d.sync_attribute().is_empty());
    }

    #[test]
    fn custom_properties_round_trip() {
        let mut info = FileInfo::file("a", "");
        info.set_custom_property("ocId", "42");
        assert_eq!(info.custom_property("ocId"), Some("42"));
        assert_eq!(info.custom_property("missing"), None);
    }
}

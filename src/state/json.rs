//! JSON-document sync-state database.
//!
//! The whole state lives in one nested JSON object of the form
//! `{"version": "1.0", "entry": {...}, "children": {"name": node, ...}}`,
//! read entirely at open and written back atomically at close. Suited for
//! small trees and for inspecting state by eye; the SQLite store scales
//! better.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{SyncStateDatabase, SyncStateEntry};
use crate::error::StateError;
use crate::path::{join_name, make_path, segments};

const CURRENT_VERSION: &str = "1.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EntryDoc {
    #[serde(rename = "modificationTime")]
    modification_time: String,
    #[serde(rename = "syncProperty")]
    sync_property: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Node {
    #[serde(skip_serializing_if = "Option::is_none")]
    entry: Option<EntryDoc>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    children: BTreeMap<String, Node>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Document {
    version: String,
    #[serde(flatten)]
    root: Node,
}

/// Sync-state database stored as a single JSON file.
pub struct JsonSyncStateDatabase {
    file_path: PathBuf,
    data: Node,
    open: bool,
}

impl JsonSyncStateDatabase {
    /// Create a database handle for the given JSON file. The file is
    /// created on first [`open`](SyncStateDatabase::open).
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
            data: Node::default(),
            open: false,
        }
    }

    fn find_node_mut(&mut self, path: &str) -> Option<&mut Node> {
        let mut node = &mut self.data;
        for part in segments(path) {
            node = node.children.get_mut(&part)?;
        }
        Some(node)
    }

    fn find_or_create_node(&mut self, path: &str) -> &mut Node {
        let mut node = &mut self.data;
        for part in segments(path) {
            node = node.children.entry(part).or_default();
        }
        node
    }

    fn find_node_ref(&self, path: &str) -> Option<&Node> {
        let mut node = &self.data;
        for part in segments(path) {
            node = node.children.get(&part)?;
        }
        Some(node)
    }
}

fn entry_to_doc(entry: &SyncStateEntry) -> EntryDoc {
    EntryDoc {
        modification_time: entry
            .modification_time()
            .map(|t| t.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
            .unwrap_or_default(),
        sync_property: entry.sync_property().to_string(),
    }
}

fn doc_to_entry(path: &str, doc: &EntryDoc) -> SyncStateEntry {
    let mtime = DateTime::parse_from_rfc3339(&doc.modification_time)
        .ok()
        .map(|t| t.with_timezone(&Utc));
    SyncStateEntry::new(path, mtime, doc.sync_property.clone())
}

impl SyncStateDatabase for JsonSyncStateDatabase {
    fn open(&mut self) -> Result<(), StateError> {
        if self.open {
            return Err(StateError::Usage("already open"));
        }
        if self.file_path.exists() {
            let raw = std::fs::read_to_string(&self.file_path)?;
            if raw.trim().is_empty() {
                self.data = Node::default();
            } else {
                let doc: Document = serde_json::from_str(&raw)
                    .map_err(|e| StateError::Format(e.to_string()))?;
                if doc.version != CURRENT_VERSION {
                    return Err(StateError::Format(format!(
                        "cannot handle sync state database of version {}",
                        doc.version
                    )));
                }
                self.data = doc.root;
            }
        } else {
            debug!(file = %self.file_path.display(), "creating sync state file");
            std::fs::File::create(&self.file_path)?;
            self.data = Node::default();
        }
        self.open = true;
        Ok(())
    }

    fn close(&mut self) -> Result<(), StateError> {
        if !self.open {
            return Err(StateError::Usage("not open"));
        }
        self.open = false;
        let doc = Document {
            version: CURRENT_VERSION.to_string(),
            root: std::mem::take(&mut self.data),
        };
        let json = serde_json::to_vec(&doc).map_err(|e| StateError::Format(e.to_string()))?;
        let dir = self
            .file_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        std::io::Write::write_all(&mut tmp, &json)?;
        tmp.persist(&self.file_path).map_err(|e| e.error)?;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn put(&mut self, entry: &SyncStateEntry) -> Result<(), StateError> {
        if !self.open {
            return Err(StateError::Usage("not open"));
        }
        let doc = entry_to_doc(entry);
        let path = entry.path().to_string();
        self.find_or_create_node(&path).entry = Some(doc);
        Ok(())
    }

    fn get(&self, path: &str) -> Result<Option<SyncStateEntry>, StateError> {
        if !self.open {
            return Err(StateError::Usage("not open"));
        }
        let path = make_path(path);
        Ok(self
            .find_node_ref(&path)
            .and_then(|node| node.entry.as_ref())
            .map(|doc| doc_to_entry(&path, doc)))
    }

    fn children(&self, path: &str) -> Result<Vec<SyncStateEntry>, StateError> {
        if !self.open {
            return Err(StateError::Usage("not open"));
        }
        let path = make_path(path);
        let mut result = Vec::new();
        if let Some(node) = self.find_node_ref(&path) {
            for (name, child) in &node.children {
                if let Some(doc) = &child.entry {
                    result.push(doc_to_entry(&join_name(&path, name), doc));
                }
            }
        }
        Ok(result)
    }

    fn delete_subtree(&mut self, path: &str) -> Result<(), StateError> {
        if !self.open {
            return Err(StateError::Usage("not open"));
        }
        if let Some(node) = self.find_node_mut(path) {
            node.children.clear();
            node.entry = None;
        }
        Ok(())
    }

    fn delete_one(&mut self, path: &str) -> Result<(), StateError> {
        if !self.open {
            return Err(StateError::Usage("not open"));
        }
        if let Some(node) = self.find_node_mut(path) {
            node.entry = None;
        }
        Ok(())
    }
}

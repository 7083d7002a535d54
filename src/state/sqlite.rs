//! SQLite-backed sync-state database.
//!
//! A single `files` table keyed by `(parent, entry)`: the path `/a/b/c`
//! stores as `parent = "a/b"`, `entry = "c"`, the root as two empty
//! strings. A `version` table gates schema migration. The file layout is
//! shared with other implementations of the same state format, so two
//! storage quirks are preserved: missing modification times are written as
//! the Unix epoch and empty sync-attributes as a literal marker string.
//! Both are normalized back on read.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;
use tracing::debug;

use super::{SyncStateDatabase, SyncStateEntry};
use crate::error::StateError;
use crate::path::{make_path, parent_key, split_parent_name};

const SCHEMA_VERSION: i64 = 1;
const INVALID_SYNC_PROPERTY: &str = "---invalid-sync-property---";

/// Sync-state database stored in a SQLite file.
pub struct SqliteSyncStateDatabase {
    db_path: PathBuf,
    conn: Option<Connection>,
}

impl SqliteSyncStateDatabase {
    /// Create a database handle for the given SQLite file. The file is
    /// created on first [`open`](SyncStateDatabase::open).
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            conn: None,
        }
    }

    fn conn(&self) -> Result<&Connection, StateError> {
        self.conn.as_ref().ok_or(StateError::Usage("not open"))
    }

    fn initialize_v1(conn: &Connection) -> Result<(), StateError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS version (key TEXT PRIMARY KEY, value)",
            [],
        )?;
        let version: Option<i64> = conn
            .query_row("SELECT value FROM version WHERE key = 'version'", [], |r| {
                r.get(0)
            })
            .optional()?;
        match version {
            None => {
                debug!(db = %conn.path().unwrap_or("?"), "creating sync state schema");
                conn.execute(
                    "CREATE TABLE files (
                         parent TEXT,
                         entry TEXT NOT NULL,
                         modificationDate TEXT NOT NULL,
                         etag TEXT NOT NULL,
                         PRIMARY KEY (parent, entry)
                     )",
                    [],
                )?;
                conn.execute(
                    "INSERT OR REPLACE INTO version (key, value) VALUES ('version', ?1)",
                    params![SCHEMA_VERSION],
                )?;
                Ok(())
            }
            Some(SCHEMA_VERSION) => Ok(()),
            Some(other) => Err(StateError::Format(format!(
                "unsupported schema version {other}"
            ))),
        }
    }

    fn row_to_entry(parent: String, entry: String, mtime: String, etag: String) -> SyncStateEntry {
        let path = if parent.is_empty() && entry.is_empty() {
            "/".to_string()
        } else if parent.is_empty() {
            format!("/{entry}")
        } else {
            format!("/{parent}/{entry}")
        };
        SyncStateEntry::new(path, decode_mtime(&mtime), decode_etag(&etag))
    }
}

fn encode_mtime(mtime: Option<DateTime<Utc>>) -> String {
    mtime
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
        .to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

fn decode_mtime(raw: &str) -> Option<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(raw).ok()?.with_timezone(&Utc);
    if parsed.timestamp_millis() == 0 {
        None
    } else {
        Some(parsed)
    }
}

fn encode_etag(etag: &str) -> &str {
    if etag.is_empty() {
        INVALID_SYNC_PROPERTY
    } else {
        etag
    }
}

fn decode_etag(raw: &str) -> String {
    if raw == INVALID_SYNC_PROPERTY {
        String::new()
    } else {
        raw.to_string()
    }
}

impl SyncStateDatabase for SqliteSyncStateDatabase {
    fn open(&mut self) -> Result<(), StateError> {
        if self.conn.is_some() {
            return Err(StateError::Usage("already open"));
        }
        let conn = Connection::open(&self.db_path)?;
        Self::initialize_v1(&conn)?;
        self.conn = Some(conn);
        Ok(())
    }

    fn close(&mut self) -> Result<(), StateError> {
        let conn = self.conn.take().ok_or(StateError::Usage("not open"))?;
        conn.close()
            .map_err(|(_, err)| StateError::Sql(err))
    }

    fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    fn put(&mut self, entry: &SyncStateEntry) -> Result<(), StateError> {
        let (parent, name) = split_parent_name(entry.path());
        self.conn()?.execute(
            "INSERT OR REPLACE INTO files (parent, entry, modificationDate, etag)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                parent,
                name,
                encode_mtime(entry.modification_time()),
                encode_etag(entry.sync_property()),
            ],
        )?;
        Ok(())
    }

    fn get(&self, path: &str) -> Result<Option<SyncStateEntry>, StateError> {
        let (parent, name) = split_parent_name(path);
        let row = self
            .conn()?
            .query_row(
                "SELECT parent, entry, modificationDate, etag
                 FROM files WHERE parent = ?1 AND entry = ?2",
                params![parent, name],
                |r| {
                    Ok(Self::row_to_entry(
                        r.get(0)?,
                        r.get(1)?,
                        r.get(2)?,
                        r.get(3)?,
                    ))
                },
            )
            .optional()?;
        Ok(row)
    }

    fn children(&self, path: &str) -> Result<Vec<SyncStateEntry>, StateError> {
        let key = parent_key(path);
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT parent, entry, modificationDate, etag FROM files WHERE parent = ?1",
        )?;
        let rows = stmt.query_map(params![key], |r| {
            Ok(Self::row_to_entry(
                r.get(0)?,
                r.get(1)?,
                r.get(2)?,
                r.get(3)?,
            ))
        })?;
        let mut result = Vec::new();
        for row in rows {
            let entry = row?;
            // The root shares parent = "" with top-level entries; skip it.
            if entry.path() != "/" {
                result.push(entry);
            }
        }
        Ok(result)
    }

    fn delete_subtree(&mut self, path: &str) -> Result<(), StateError> {
        let clean = make_path(path);
        if clean == "/" {
            self.conn()?.execute("DELETE FROM files", [])?;
            return Ok(());
        }
        let key = parent_key(&clean);
        let (parent, name) = split_parent_name(&clean);
        self.conn()?.execute(
            "DELETE FROM files
             WHERE parent = ?1 OR parent LIKE ?1 || '/%' OR (parent = ?2 AND entry = ?3)",
            params![key, parent, name],
        )?;
        Ok(())
    }

    fn delete_one(&mut self, path: &str) -> Result<(), StateError> {
        let (parent, name) = split_parent_name(path);
        self.conn()?.execute(
            "DELETE FROM files WHERE parent = ?1 AND entry = ?2",
            params![parent, name],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn open_db(dir: &tempfile::TempDir) -> SqliteSyncStateDatabase {
        let mut db = SqliteSyncStateDatabase::new(dir.path().join("state.db"));
        db.open().unwrap();
        db
    }

    fn entry(path: &str, etag: &str) -> SyncStateEntry {
        let mtime = Utc.with_ymd_and_hms(2024, 5, 17, 12, 30, 45).unwrap();
        SyncStateEntry::new(path, Some(mtime), etag)
    }

    #[test]
    fn open_creates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir);
        assert!(db.is_open());
        assert!(dir.path().join("state.db").exists());
    }

    #[test]
    fn reopen_after_close_round_trips_entries() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = open_db(&dir);
        let e = entry("/docs/readme.md", "etag-7");
        db.put(&e).unwrap();
        db.close().unwrap();

        db.open().unwrap();
        assert_eq!(db.get("/docs/readme.md").unwrap(), Some(e));
    }

    #[test]
    fn double_open_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = open_db(&dir);
        assert!(matches!(db.open(), Err(StateError::Usage(_))));
    }

    #[test]
    fn get_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir);
        assert_eq!(db.get("/nope").unwrap(), None);
    }

    #[test]
    fn children_are_direct_only_and_exclude_root() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = open_db(&dir);
        db.put(&SyncStateEntry::new("/", None, "")).unwrap();
        db.put(&entry("/a", "1")).unwrap();
        db.put(&entry("/a/x", "2")).unwrap();
        db.put(&entry("/a/x/deep", "3")).unwrap();
        db.put(&entry("/b", "4")).unwrap();

        let mut top: Vec<String> = db
            .children("/")
            .unwrap()
            .into_iter()
            .map(|e| e.path().to_string())
            .collect();
        top.sort();
        assert_eq!(top, vec!["/a", "/b"]);

        let under_a: Vec<String> = db
            .children("/a")
            .unwrap()
            .into_iter()
            .map(|e| e.path().to_string())
            .collect();
        assert_eq!(under_a, vec!["/a/x"]);
    }

    #[test]
    fn delete_subtree_spares_sibling_with_common_name_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = open_db(&dir);
        db.put(&entry("/a", "1")).unwrap();
        db.put(&entry("/a/x", "2")).unwrap();
        db.put(&entry("/ab", "3")).unwrap();
        db.put(&entry("/ab/y", "4")).unwrap();

        db.delete_subtree("/a").unwrap();

        assert_eq!(db.get("/a").unwrap(), None);
        assert_eq!(db.get("/a/x").unwrap(), None);
        assert!(db.get("/ab").unwrap().is_some());
        assert!(db.get("/ab/y").unwrap().is_some());
    }

    #[test]
    fn delete_one_keeps_descendants() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = open_db(&dir);
        db.put(&entry("/a", "1")).unwrap();
        db.put(&entry("/a/x", "2")).unwrap();

        db.delete_one("/a").unwrap();

        assert_eq!(db.get("/a").unwrap(), None);
        assert!(db.get("/a/x").unwrap().is_some());
    }

    #[test]
    fn empty_sync_property_and_mtime_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = open_db(&dir);
        db.put(&SyncStateEntry::new("/folder", None, "")).unwrap();

        let restored = db.get("/folder").unwrap().unwrap();
        assert_eq!(restored.modification_time(), None);
        assert_eq!(restored.sync_property(), "");
    }
}

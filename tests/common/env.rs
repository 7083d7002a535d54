//! Isolated test environment: a scratch local directory, a scratch
//! sync-state file and a shared mock backend.

use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;
use tidemark::{JsonSyncStateDatabase, SyncStateDatabase, Synchronizer};

use super::mock_remote::MockRemote;

pub const REMOTE_DIR: &str = "/remote";

pub struct TestEnv {
    pub local: TempDir,
    state: TempDir,
    pub remote: MockRemote,
}

impl TestEnv {
    pub fn new(remote: MockRemote) -> Self {
        Self {
            local: TempDir::new().unwrap(),
            state: TempDir::new().unwrap(),
            remote,
        }
    }

    pub fn state_file(&self) -> PathBuf {
        self.state.path().join("sync-state.json")
    }

    /// A fresh synchronizer against the shared mock and state file.
    pub fn synchronizer(&self) -> Synchronizer {
        Synchronizer::new(
            Arc::new(self.remote.clone()),
            Box::new(JsonSyncStateDatabase::new(self.state_file())),
            self.local.path(),
            REMOTE_DIR,
        )
    }

    /// Open the state file for inspection between runs.
    pub fn open_state(&self) -> JsonSyncStateDatabase {
        let mut db = JsonSyncStateDatabase::new(self.state_file());
        db.open().unwrap();
        db
    }

    pub fn write_local(&self, relative: &str, content: &str) {
        let path = self.local.path().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    pub fn read_local(&self, relative: &str) -> Option<String> {
        std::fs::read_to_string(self.local.path().join(relative)).ok()
    }

    pub fn local_exists(&self, relative: &str) -> bool {
        self.local.path().join(relative).exists()
    }

    /// Nudge the clock so a rewritten file gets a distinct mtime even on
    /// coarse-grained filesystems.
    pub fn tick() {
        std::thread::sleep(std::time::Duration::from_millis(5));
    }
}

//! Property tests for sync-state persistence.

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use tidemark::{
    JsonSyncStateDatabase, SqliteSyncStateDatabase, SyncStateDatabase, SyncStateEntry,
};

fn entry() -> impl Strategy<Value = SyncStateEntry> {
    let segment = proptest::string::string_regex("[A-Za-z0-9._-]{1,8}").unwrap();
    let path = proptest::collection::vec(segment, 1..=4)
        .prop_map(|segments| format!("/{}", segments.join("/")));
    // Timestamps at millisecond precision, as the stores persist them.
    let mtime = proptest::option::of(1_000_000_i64..4_000_000_000_000).prop_map(|millis| {
        millis.and_then(|m| Utc.timestamp_millis_opt(m).single())
    });
    let attr = proptest::string::string_regex("[ -~]{0,24}").unwrap();
    (path, mtime, attr).prop_map(|(path, mtime, attr)| SyncStateEntry::new(path, mtime, attr))
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 32,
        .. ProptestConfig::default()
    })]

    /// PROPERTY: every entry survives close-then-reopen unchanged, in
    /// both store implementations.
    #[test]
    fn entries_round_trip_through_both_stores(
        entries in proptest::collection::vec(entry(), 0..12)
    ) {
        let dir = tempfile::tempdir().unwrap();
        let mut sql = SqliteSyncStateDatabase::new(dir.path().join("s.db"));
        let mut json = JsonSyncStateDatabase::new(dir.path().join("s.json"));
        let stores: [&mut dyn SyncStateDatabase; 2] = [&mut sql, &mut json];

        for store in stores {
            store.open().unwrap();
            for entry in &entries {
                store.put(entry).unwrap();
            }
            store.close().unwrap();

            store.open().unwrap();
            // Later puts on the same path win; compare against the last.
            let mut expected = std::collections::BTreeMap::new();
            for entry in &entries {
                expected.insert(entry.path().to_string(), entry.clone());
            }
            for (path, entry) in expected {
                prop_assert_eq!(store.get(&path).unwrap(), Some(entry));
            }
            store.close().unwrap();
        }
    }
}

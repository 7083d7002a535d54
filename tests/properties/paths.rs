//! Property tests for sync-path canonicalization.

use proptest::prelude::*;
use tidemark::path::{is_proper_prefix, join_name, make_path, split_parent_name};

fn path_segment() -> impl Strategy<Value = String> {
    proptest::string::string_regex("[A-Za-z0-9 ._-]{1,12}")
        .unwrap()
        .prop_filter("no dot segments", |s| s != "." && s != "..")
}

fn canonical_path() -> impl Strategy<Value = String> {
    proptest::collection::vec(path_segment(), 0..=5)
        .prop_map(|segments| format!("/{}", segments.join("/")))
        .prop_map(|p| make_path(&p))
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        .. ProptestConfig::default()
    })]

    /// PROPERTY: canonicalization never panics on arbitrary input.
    #[test]
    fn make_path_never_panics(s in "(?s).{0,128}") {
        let _ = make_path(&s);
    }

    /// PROPERTY: `make_path` is idempotent.
    #[test]
    fn make_path_is_idempotent(s in "[a-z./]{0,64}") {
        let once = make_path(&s);
        prop_assert_eq!(make_path(&once), once);
    }

    /// PROPERTY: canonical paths start with `/` and only the root ends
    /// with one.
    #[test]
    fn canonical_shape(s in "(?s).{0,128}") {
        let canon = make_path(&s);
        prop_assert!(canon.starts_with('/'));
        if canon != "/" {
            prop_assert!(!canon.ends_with('/'));
        }
    }

    /// PROPERTY: splitting a canonical path and joining it back is the
    /// identity (root aside).
    #[test]
    fn split_then_join_round_trips(path in canonical_path()) {
        let (parent, name) = split_parent_name(&path);
        if path == "/" {
            prop_assert_eq!(parent, "");
            prop_assert_eq!(name, "");
        } else {
            let rebuilt = join_name(&make_path(&parent), &name);
            prop_assert_eq!(rebuilt, path);
        }
    }

    /// PROPERTY: a joined child always has its parent as proper prefix,
    /// and a path is never a proper prefix of itself.
    #[test]
    fn proper_prefix_consistency(dir in canonical_path(), name in path_segment()) {
        let child = join_name(&dir, &name);
        prop_assert!(is_proper_prefix(&dir, &child));
        prop_assert!(!is_proper_prefix(&child, &dir));
        prop_assert!(!is_proper_prefix(&dir, &dir));
    }
}
